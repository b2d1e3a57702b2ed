use copilot_chat::host::{RpcEvent, Value};
use copilot_chat::{load_config, logging, CopilotPlugin, RpcHost};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    logging::init();

    let settings = load_config();
    let mut host = RpcHost::stdio();
    let mut plugin = CopilotPlugin::new(settings);
    info!("copilot-chat started");

    // Main event loop: one editor message at a time until stdin closes
    loop {
        let event = match host.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(e) => {
                error!("rpc channel failed: {}", e);
                return Err(e.into());
            }
        };

        match event {
            RpcEvent::Notification { method, params } => {
                plugin.handle_notification(&mut host, &method, &params);
            }
            RpcEvent::Request { id, method, params } => {
                // Commands invoked with rpcrequest block the editor until answered
                plugin.handle_notification(&mut host, &method, &params);
                host.session().respond(id, None, Value::Nil)?;
            }
        }
    }

    info!("copilot-chat stopped");
    Ok(())
}
