//! In-place chat: a floating layout over the code
//!
//! ```text
//! +-----------------+-----------------+
//! | Original        | Copilot         |
//! |                 |                 |
//! +-----------------+-----------------+
//! | Prompt          | Help            |
//! +-----------------+-----------------+
//! ```
//!
//! The answer can replace the selected lines, be diffed against them, or be
//! regenerated with another model or system prompt.

use anyhow::Result;
use tracing::{debug, info};

use crate::chat::{ChatHandler, ChatInput, ChatSession};
use crate::config::{Settings, UserPrompt};
use crate::host::{split_lines, BufferId, Dispatcher, Host, Relative, Value};
use crate::prompts::{
    PromptRegistry, COPILOT_INSTRUCTIONS, PROMPT_SEPARATE, PROMPT_SIMPLE_DOCSTRING,
    SYSTEM_PROMPT_CYCLE,
};
use crate::ui::{Direction, Layout, LayoutBox, Padding, PopUpBuilder, PopupEvent, PopupId, PopupStore};

pub const MODEL_GPT4: &str = "gpt-4";
pub const MODEL_GPT35_TURBO: &str = "gpt-3.5-turbo";

const DEFAULT_SYSTEM_PROMPT: &str = "SENIOR_DEVELOPER_PROMPT";

/// Key actions of the in-place chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InPlaceAction {
    Chat,
    /// `<C-s>` in insert mode: leave insert mode, then chat
    InsertChat,
    ReplaceOriginal,
    ToggleDiff,
    ToggleModel,
    CycleSystemPrompt,
    SetPrompt(&'static str),
    NextUserPrompt,
    PreviousUserPrompt,
    ClearChat,
    ToggleHelp,
    /// `<Tab>` pressed in this popup
    FocusNext(PopupId),
}

/// Where the answer goes when it replaces the original code
#[derive(Debug, Clone)]
struct Target {
    code: String,
    filetype: String,
    /// 0-based, end-exclusive line range in `buffer`
    start: i64,
    end: i64,
    buffer: BufferId,
}

pub fn copilot_title(model: &str, system_prompt: &str) -> String {
    format!("Copilot ({}, {})", model, system_prompt)
}

/// Popup geometry: 80% x 60% of the editor, centered
fn build_layout(original: PopupId, copilot: PopupId, prompt: PopupId, help: Option<PopupId>) -> Layout {
    let bottom = match help {
        Some(help) => LayoutBox::boxes(vec![LayoutBox::popups(vec![prompt]), LayoutBox::popups(vec![help])])
            .size(["50%", "50%"]),
        None => LayoutBox::boxes(vec![LayoutBox::popups(vec![prompt]), LayoutBox::empty()])
            .size(["100%", "0%"]),
    };
    let root = LayoutBox::boxes(vec![
        LayoutBox::boxes(vec![LayoutBox::popups(vec![original]), LayoutBox::popups(vec![copilot])])
            .size(["50%", "50%"])
            .direction(Direction::Row),
        bottom.direction(Direction::Row),
    ])
    .size(["80%", "20%"])
    .direction(Direction::Col);

    Layout::new(root, "80%", "60%", "50%", "50%", Relative::Editor)
}

/// Help popup content
pub fn help_lines(user_prompts: &[UserPrompt]) -> Vec<String> {
    let mut lines: Vec<String> = [
        "Navigation:",
        "  <Tab>: Switch focus between popups",
        "  q: Close layout",
        "  ?: Toggle help content",
        "",
        "Chat in Normal Mode:",
        "  <CR>: Submit prompt to Copilot",
        "  <C-CR>: Replace old code with new",
        "  <C-d>: Show code differences",
        "  <C-l>: Clear chat history",
        "",
        "Chat in Insert Mode:",
        "  <C-s>: Start chat and submit prompt to Copilot",
        "",
        "Prompt Binding:",
        "  ': Set prompt to SIMPLE_DOCSTRING",
        "  s: Set prompt to SEPARATE",
        "  <C-p>: Get the previous user prompt",
        "  <C-n>: Set prompt to next item in user prompts",
        "",
        "Model:",
        "  <C-g>: Toggle AI model",
        "  <C-m>: Set system prompt to next item in system prompts",
        "",
        "User prompts:",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect();

    lines.extend(
        user_prompts
            .iter()
            .map(|p| format!("  {}: {}", p.name, p.prompt)),
    );
    lines
}

/// Strip a surrounding ``` fence from an answer
pub fn strip_fence(mut lines: Vec<String>) -> Vec<String> {
    if !lines.first().map_or(false, |line| line.starts_with("```")) {
        return lines;
    }
    if lines.len() < 2 {
        return Vec::new();
    }
    lines.pop();
    lines.remove(0);
    lines
}

pub struct InPlaceChatHandler {
    popups: PopupStore,
    original: PopupId,
    copilot: PopupId,
    prompt: PopupId,
    help: PopupId,
    layout: Layout,
    help_visible: bool,
    diff_mode: bool,
    model: &'static str,
    system_prompt: &'static str,
    user_prompts: Vec<UserPrompt>,
    current_user_prompt: usize,
    chat: ChatHandler,
    target: Option<Target>,
}

impl InPlaceChatHandler {
    pub fn new<A>(
        host: &mut dyn Host,
        dispatcher: &mut Dispatcher<A>,
        settings: &Settings,
        prompts: PromptRegistry,
    ) -> Result<Self>
    where
        A: Clone + From<PopupEvent> + From<InPlaceAction>,
    {
        let model = MODEL_GPT4;
        let system_prompt = DEFAULT_SYSTEM_PROMPT;

        let mut popups = PopupStore::new();
        let original = popups.create(host, dispatcher, PopUpBuilder::new().title("Original"))?;
        let copilot = popups.create(
            host,
            dispatcher,
            PopUpBuilder::new()
                .title(copilot_title(model, system_prompt))
                .window_option("wrap", true)
                .window_option("linebreak", true),
        )?;
        let prompt = popups.create(
            host,
            dispatcher,
            PopUpBuilder::new().title("Prompt").enter(true).padding(Padding {
                left: 1,
                right: 1,
                ..Default::default()
            }),
        )?;
        let help = popups.create(host, dispatcher, PopUpBuilder::new().title("Help"))?;

        let help_visible = settings.ui.show_help;
        let layout = build_layout(original, copilot, prompt, help_visible.then_some(help));
        let chat = ChatHandler::new(popups[copilot].buffer(), prompts);

        let handler = Self {
            popups,
            original,
            copilot,
            prompt,
            help,
            layout,
            help_visible,
            diff_mode: false,
            model,
            system_prompt,
            user_prompts: settings.ui.user_prompts.clone(),
            current_user_prompt: 0,
            chat,
            target: None,
        };
        handler.set_keymaps(host, dispatcher)?;
        host.buf_replace(handler.popups[help].buffer(), &help_lines(&handler.user_prompts))?;
        Ok(handler)
    }

    pub fn popups(&self) -> &PopupStore {
        &self.popups
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn chat_handler(&mut self) -> &mut ChatHandler {
        &mut self.chat
    }

    pub fn original_popup(&self) -> PopupId {
        self.original
    }

    pub fn copilot_popup(&self) -> PopupId {
        self.copilot
    }

    pub fn prompt_popup(&self) -> PopupId {
        self.prompt
    }

    pub fn help_popup(&self) -> PopupId {
        self.help
    }

    pub fn model(&self) -> &str {
        self.model
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt
    }

    pub fn is_help_visible(&self) -> bool {
        self.help_visible
    }

    pub fn is_diff_mode(&self) -> bool {
        self.diff_mode
    }

    /// Popups `<Tab>` cycles through, in order
    pub fn visible_popups(&self) -> Vec<PopupId> {
        let mut popups = vec![self.original, self.copilot, self.prompt];
        if self.help_visible {
            popups.push(self.help);
        }
        popups
    }

    /// Show the layout for `code`, the 1-based inclusive `range` of `buffer`
    pub fn mount(
        &mut self,
        host: &mut dyn Host,
        code: &str,
        filetype: &str,
        range: (i64, i64),
        buffer: BufferId,
    ) -> Result<()> {
        self.target = Some(Target {
            code: code.to_string(),
            filetype: filetype.to_string(),
            start: range.0 - 1,
            end: range.1,
            buffer,
        });

        let original = self.popups[self.original].buffer();
        host.buf_replace(original, &split_lines(code))?;
        host.buf_set_option(original, "filetype", Value::from(filetype))?;
        host.buf_set_option(self.popups[self.copilot].buffer(), "filetype", Value::from("markdown"))?;

        self.layout.mount(host, &mut self.popups)
    }

    pub fn unmount(&mut self, host: &mut dyn Host) -> Result<()> {
        self.layout.unmount(host, &mut self.popups)
    }

    /// Default popup callbacks: `q` closes the whole layout, entering a
    /// popup makes it the one refocused on the next mount
    pub fn handle_popup_event(&mut self, host: &mut dyn Host, event: PopupEvent) -> Result<()> {
        match event {
            PopupEvent::Unmount(_) => self.unmount(host),
            PopupEvent::Entered(id) => {
                // BufEnter arrives after the fact; the popup may be gone by then
                if self.popups[id].is_mounted() {
                    self.layout.set_last_popup(id);
                }
                Ok(())
            }
        }
    }

    pub fn handle<A>(
        &mut self,
        host: &mut dyn Host,
        dispatcher: &mut Dispatcher<A>,
        session: &mut ChatSession,
        settings: &Settings,
        action: InPlaceAction,
    ) -> Result<()>
    where
        A: Clone + From<PopupEvent> + From<InPlaceAction>,
    {
        debug!(?action, "in-place action");
        match action {
            InPlaceAction::Chat => self.chat(host, session, settings),
            InPlaceAction::InsertChat => {
                host.command("stopinsert")?;
                self.chat(host, session, settings)
            }
            InPlaceAction::ReplaceOriginal => self.replace_original(host),
            InPlaceAction::ToggleDiff => self.toggle_diff(host),
            InPlaceAction::ToggleModel => self.toggle_model(host),
            InPlaceAction::CycleSystemPrompt => self.cycle_system_prompt(host),
            InPlaceAction::SetPrompt(prompt) => self.set_prompt(host, prompt),
            InPlaceAction::NextUserPrompt => self.step_user_prompt(host, 1),
            InPlaceAction::PreviousUserPrompt => self.step_user_prompt(host, -1),
            InPlaceAction::ClearChat => host.buf_replace(self.popups[self.copilot].buffer(), &[]),
            InPlaceAction::ToggleHelp => self.toggle_help(host, dispatcher),
            InPlaceAction::FocusNext(from) => self.focus_next(host, from),
        }
    }

    fn chat(&mut self, host: &mut dyn Host, session: &mut ChatSession, settings: &Settings) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };
        let copilot = &self.popups[self.copilot];
        host.buf_replace(copilot.buffer(), &[String::new()])?;
        copilot.window_command(host, "norm! gg")?;
        let window = match copilot.window() {
            Some(window) => window,
            None => host.get_current_win()?,
        };

        let prompt = host
            .buf_get_lines(self.popups[self.prompt].buffer(), 0, -1)?
            .join("\n");
        let system_prompt = self
            .chat
            .prompts()
            .get(self.system_prompt)
            .unwrap_or(COPILOT_INSTRUCTIONS);

        let input = ChatInput {
            system_prompt: Some(system_prompt),
            model: Some(self.model),
            start_separator: false,
            end_separator: false,
            ..ChatInput::new(&prompt, &target.filetype, &target.code, window)
        };
        self.chat.chat(host, session, settings, &input)
    }

    fn replace_original(&mut self, host: &mut dyn Host) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };
        let answer = host.buf_get_lines(self.popups[self.copilot].buffer(), 0, -1)?;
        let lines = strip_fence(answer);
        info!(
            start = target.start,
            end = target.end,
            lines = lines.len(),
            "replacing original code"
        );
        host.buf_set_lines(target.buffer, target.start, target.end, false, &lines)?;
        self.layout.unmount(host, &mut self.popups)?;
        host.command("norm! ^")
    }

    fn toggle_diff(&mut self, host: &mut dyn Host) -> Result<()> {
        if self.diff_mode {
            self.popups[self.original].window_command(host, "diffoff")?;
        } else {
            self.popups[self.original].window_command(host, "diffthis")?;
            self.popups[self.copilot].window_command(host, "diffthis")?;
        }
        self.diff_mode = !self.diff_mode;
        Ok(())
    }

    fn toggle_model(&mut self, host: &mut dyn Host) -> Result<()> {
        self.model = if self.model == MODEL_GPT4 {
            MODEL_GPT35_TURBO
        } else {
            MODEL_GPT4
        };
        self.retitle_copilot(host)
    }

    fn cycle_system_prompt(&mut self, host: &mut dyn Host) -> Result<()> {
        let index = SYSTEM_PROMPT_CYCLE
            .iter()
            .position(|name| *name == self.system_prompt)
            .unwrap_or(0);
        self.system_prompt = SYSTEM_PROMPT_CYCLE[(index + 1) % SYSTEM_PROMPT_CYCLE.len()];
        self.retitle_copilot(host)
    }

    /// Show the current model and system prompt in the Copilot popup title
    fn retitle_copilot(&mut self, host: &mut dyn Host) -> Result<()> {
        let title = copilot_title(self.model, self.system_prompt);
        let popup = &mut self.popups[self.copilot];
        popup.set_title(&title);
        if popup.is_mounted() {
            popup.unmount(host)?;
            popup.mount(host, true)?;
        }
        Ok(())
    }

    fn set_prompt(&mut self, host: &mut dyn Host, prompt: &str) -> Result<()> {
        host.buf_replace(self.popups[self.prompt].buffer(), &split_lines(prompt))
    }

    fn step_user_prompt(&mut self, host: &mut dyn Host, step: isize) -> Result<()> {
        let count = self.user_prompts.len();
        if count == 0 {
            return Ok(());
        }
        self.current_user_prompt =
            (self.current_user_prompt as isize + step).rem_euclid(count as isize) as usize;
        let text = self.user_prompts[self.current_user_prompt].prompt.clone();
        self.set_prompt(host, &text)
    }

    fn focus_next(&mut self, host: &mut dyn Host, from: PopupId) -> Result<()> {
        let popups = self.visible_popups();
        let index = popups.iter().position(|id| *id == from).unwrap_or(0);
        let next = popups[(index + 1) % popups.len()];
        self.popups[next].focus(host)
    }

    /// Rebuild the layout with or without the help popup
    fn toggle_help<A>(&mut self, host: &mut dyn Host, dispatcher: &mut Dispatcher<A>) -> Result<()>
    where
        A: Clone + From<PopupEvent> + From<InPlaceAction>,
    {
        self.layout.unmount(host, &mut self.popups)?;
        self.help_visible = !self.help_visible;
        self.layout = build_layout(
            self.original,
            self.copilot,
            self.prompt,
            self.help_visible.then_some(self.help),
        );
        self.set_keymaps(host, dispatcher)?;
        self.layout.mount(host, &mut self.popups)
    }

    fn set_keymaps<A>(&self, host: &mut dyn Host, dispatcher: &mut Dispatcher<A>) -> Result<()>
    where
        A: Clone + From<PopupEvent> + From<InPlaceAction>,
    {
        let prompt = &self.popups[self.prompt];
        let prompt_keys = [
            ("n", "<CR>", InPlaceAction::Chat),
            ("n", "<C-CR>", InPlaceAction::ReplaceOriginal),
            ("n", "<C-d>", InPlaceAction::ToggleDiff),
            ("n", "<C-g>", InPlaceAction::ToggleModel),
            ("n", "<C-m>", InPlaceAction::CycleSystemPrompt),
            ("n", "'", InPlaceAction::SetPrompt(PROMPT_SIMPLE_DOCSTRING)),
            ("n", "s", InPlaceAction::SetPrompt(PROMPT_SEPARATE)),
            ("i", "<C-s>", InPlaceAction::InsertChat),
            ("n", "<C-n>", InPlaceAction::NextUserPrompt),
            ("n", "<C-p>", InPlaceAction::PreviousUserPrompt),
        ];
        for (mode, lhs, action) in prompt_keys {
            prompt.map(host, dispatcher, mode, lhs, A::from(action))?;
        }

        for id in self.visible_popups() {
            let popup = &self.popups[id];
            popup.map(host, dispatcher, "n", "<C-l>", A::from(InPlaceAction::ClearChat))?;
            popup.map(host, dispatcher, "n", "?", A::from(InPlaceAction::ToggleHelp))?;
            popup.map(host, dispatcher, "n", "<Tab>", A::from(InPlaceAction::FocusNext(id)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fence() {
        let lines = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            strip_fence(lines(&["```rust", "fn main() {}", "```"])),
            lines(&["fn main() {}"])
        );
        assert_eq!(strip_fence(lines(&["fn main() {}"])), lines(&["fn main() {}"]));
        assert_eq!(strip_fence(lines(&["```"])), Vec::<String>::new());
    }

    #[test]
    fn test_help_lists_user_prompts() {
        let lines = help_lines(&[UserPrompt {
            name: "docs".to_string(),
            prompt: "Write docs".to_string(),
        }]);
        assert_eq!(lines[0], "Navigation:");
        assert_eq!(lines[lines.len() - 2], "User prompts:");
        assert_eq!(lines[lines.len() - 1], "  docs: Write docs");
        assert!(lines.contains(&"  <C-CR>: Replace old code with new".to_string()));
    }

    #[test]
    fn test_copilot_title() {
        assert_eq!(
            copilot_title("gpt-4", "SENIOR_DEVELOPER_PROMPT"),
            "Copilot (gpt-4, SENIOR_DEVELOPER_PROMPT)"
        );
    }
}
