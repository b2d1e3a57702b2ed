//! Box tree and the layout that mounts it
//!
//! Boxes split their space among children along one axis. Each declared size
//! is a percentage of the parent; siblings are separated by `gap + 2` cells,
//! the 2 accounting for the border every popup draws around itself.

use anyhow::Result;
use tracing::{debug, warn};

use super::calculator::{self, Bounds, Dimension};
use super::popup::{PopUpConfiguration, PopupId, PopupStore};
use super::LayoutError;
use crate::host::{Host, Relative};

/// Axis along which a box splits its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Side by side
    #[default]
    Row,
    /// Stacked
    Col,
}

/// Children of a box: either more boxes, or popups sharing the box's space
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxItems {
    Boxes(Vec<LayoutBox>),
    Popups(Vec<PopupId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBox {
    items: BoxItems,
    size: Vec<String>,
    direction: Direction,
    gap: i64,

    width: i64,
    height: i64,
    row: i64,
    col: i64,
    relative: Relative,
    last_child_row: i64,
    last_child_col: i64,
}

impl LayoutBox {
    pub fn new(items: BoxItems) -> Self {
        Self {
            items,
            size: vec!["100%".to_string()],
            direction: Direction::Row,
            gap: 0,
            width: 0,
            height: 0,
            row: 0,
            col: 0,
            relative: Relative::Editor,
            last_child_row: 0,
            last_child_col: 0,
        }
    }

    /// Box holding popups; each of them gets the whole box
    pub fn popups(popups: Vec<PopupId>) -> Self {
        Self::new(BoxItems::Popups(popups))
    }

    /// Box splitting its space among `boxes`
    pub fn boxes(boxes: Vec<LayoutBox>) -> Self {
        Self::new(BoxItems::Boxes(boxes))
    }

    /// Placeholder that takes up its share and holds nothing
    pub fn empty() -> Self {
        Self::new(BoxItems::Boxes(Vec::new())).size(Vec::<String>::new())
    }

    /// One size per child, as `"50%"` or `"50"`
    pub fn size<S: Into<String>>(mut self, size: impl IntoIterator<Item = S>) -> Self {
        self.size = size.into_iter().map(Into::into).collect();
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn gap(mut self, gap: i64) -> Self {
        self.gap = gap;
        self
    }

    pub fn items(&self) -> &BoxItems {
        &self.items
    }

    /// (width, height, row, col) assigned by the parent
    pub fn dimensions(&self) -> (i64, i64, i64, i64) {
        (self.width, self.height, self.row, self.col)
    }

    pub fn set_base_dimensions(&mut self, width: i64, height: i64, row: i64, col: i64, relative: Relative) {
        self.width = width;
        self.height = height;
        self.row = row;
        self.col = col;
        self.relative = relative;

        self.last_child_row = row;
        self.last_child_col = col;
    }

    /// Split this box's space among its children, recursively
    pub fn process(&mut self, popups: &mut PopupStore) -> Result<(), LayoutError> {
        match &mut self.items {
            BoxItems::Boxes(children) => {
                if self.size.len() != children.len() {
                    return Err(LayoutError::SizeMismatch {
                        sizes: self.size.len(),
                        items: children.len(),
                    });
                }
                let sizes = parse_sizes(&self.size)?;
                let total: i64 = sizes.iter().sum();
                if !children.is_empty() && total != 100 {
                    warn!(?sizes, total, "box sizes do not add up to 100%");
                }

                let offset = self.gap + 2;
                for (index, (child, size)) in children.iter_mut().zip(&sizes).enumerate() {
                    let index = index as i64;
                    match self.direction {
                        Direction::Row => {
                            let child_width = (self.width * size).div_euclid(100) - offset;
                            let child_col = self.last_child_col + offset * index;
                            self.last_child_col = child_col + child_width - offset * index;
                            child.set_base_dimensions(
                                child_width,
                                self.height,
                                self.row,
                                child_col,
                                self.relative,
                            );
                        }
                        Direction::Col => {
                            let child_height = (self.height * size).div_euclid(100) - offset + 1;
                            let child_row = self.last_child_row + offset * index;
                            self.last_child_row = child_row + child_height - offset * index;
                            child.set_base_dimensions(
                                self.width,
                                child_height,
                                child_row,
                                self.col,
                                self.relative,
                            );
                        }
                    }
                }

                for child in children.iter_mut() {
                    child.process(popups)?;
                }
            }
            BoxItems::Popups(ids) => {
                for id in ids.iter() {
                    popups[*id].define_controlled_configurations(
                        self.width,
                        self.height,
                        self.row,
                        self.col,
                        self.relative,
                    );
                }
            }
        }
        Ok(())
    }

    pub fn mount(&self, host: &mut dyn Host, popups: &mut PopupStore) -> Result<()> {
        match &self.items {
            BoxItems::Boxes(children) => {
                for child in children {
                    child.mount(host, popups)?;
                }
            }
            BoxItems::Popups(ids) => {
                for id in ids {
                    popups[*id].mount(host, true)?;
                }
            }
        }
        Ok(())
    }

    pub fn unmount(&self, host: &mut dyn Host, popups: &mut PopupStore) -> Result<()> {
        match &self.items {
            BoxItems::Boxes(children) => {
                for child in children {
                    child.unmount(host, popups)?;
                }
            }
            BoxItems::Popups(ids) => {
                for id in ids {
                    popups[*id].unmount(host)?;
                }
            }
        }
        Ok(())
    }

    /// Every popup in the tree, depth first
    pub fn collect_popups(&self, out: &mut Vec<PopupId>) {
        match &self.items {
            BoxItems::Boxes(children) => children.iter().for_each(|c| c.collect_popups(out)),
            BoxItems::Popups(ids) => out.extend(ids.iter().copied()),
        }
    }
}

fn parse_sizes(sizes: &[String]) -> Result<Vec<i64>, LayoutError> {
    sizes
        .iter()
        .map(|raw| {
            raw.trim()
                .trim_end_matches('%')
                .parse::<i64>()
                .map_err(|_| LayoutError::InvalidSize(raw.clone()))
        })
        .collect()
}

/// Runs once, after the first successful mount
pub type MountCallback = Box<dyn FnMut(&mut dyn Host, &mut PopupStore) -> Result<()>>;

/// Root of a box tree plus the overall geometry it is mounted into
pub struct Layout {
    root: LayoutBox,
    config: PopUpConfiguration,
    last_popup: Option<PopupId>,
    mounting: bool,
    unmounting: bool,
    mounted: bool,
    has_been_mounted: bool,
    post_first_mount: Option<MountCallback>,
}

impl Layout {
    /// `row`/`col` are the center of the layout, as for an uncontrolled popup
    pub fn new(
        root: LayoutBox,
        width: impl Into<Dimension>,
        height: impl Into<Dimension>,
        row: impl Into<Dimension>,
        col: impl Into<Dimension>,
        relative: Relative,
    ) -> Self {
        Self {
            root,
            config: PopUpConfiguration {
                relative,
                width: width.into(),
                height: height.into(),
                row: row.into(),
                col: col.into(),
                ..Default::default()
            },
            last_popup: None,
            mounting: false,
            unmounting: false,
            mounted: false,
            has_been_mounted: false,
            post_first_mount: None,
        }
    }

    pub fn on_first_mount(
        mut self,
        callback: impl FnMut(&mut dyn Host, &mut PopupStore) -> Result<()> + 'static,
    ) -> Self {
        self.post_first_mount = Some(Box::new(callback));
        self
    }

    pub fn root(&self) -> &LayoutBox {
        &self.root
    }

    pub fn mount(&mut self, host: &mut dyn Host, popups: &mut PopupStore) -> Result<()> {
        self.mounting = true;
        let result = self.mount_tree(host, popups);
        self.mounting = false;
        result?;
        self.mounted = true;

        if !self.has_been_mounted {
            self.has_been_mounted = true;
            if let Some(callback) = self.post_first_mount.as_mut() {
                callback(host, popups)?;
            }
        }

        if let Some(last) = self.last_popup {
            popups[last].focus(host)?;
        }
        Ok(())
    }

    fn mount_tree(&mut self, host: &mut dyn Host, popups: &mut PopupStore) -> Result<()> {
        let bounds = Bounds::fetch(host)?;
        let absolute = calculator::center(&self.config, &bounds)?;
        debug!(
            width = absolute.width,
            height = absolute.height,
            row = absolute.row,
            col = absolute.col,
            "mounting layout"
        );
        self.root.set_base_dimensions(
            absolute.width,
            absolute.height,
            absolute.row,
            absolute.col,
            absolute.relative,
        );
        self.root.process(popups)?;
        self.root.mount(host, popups)
    }

    pub fn unmount(&mut self, host: &mut dyn Host, popups: &mut PopupStore) -> Result<()> {
        self.unmounting = true;
        let result = self.root.unmount(host, popups);
        self.unmounting = false;
        self.mounted = false;
        result
    }

    /// Remember `popup` to refocus on the next mount; ignored mid-(un)mount.
    /// BufEnter callbacks reach the plugin only after `mount` returns, so
    /// callers also drop events for popups that are no longer mounted.
    pub fn set_last_popup(&mut self, popup: PopupId) {
        if !self.mounting && !self.unmounting {
            self.last_popup = Some(popup);
        }
    }

    pub fn last_popup(&self) -> Option<PopupId> {
        self.last_popup
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn has_been_mounted(&self) -> bool {
        self.has_been_mounted
    }

    pub fn popups(&self) -> Vec<PopupId> {
        let mut out = Vec::new();
        self.root.collect_popups(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Dispatcher, FakeHost};
    use crate::ui::popup::{PopUpBuilder, PopupEvent};
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    struct Event(#[allow(dead_code)] PopupEvent);

    impl From<PopupEvent> for Event {
        fn from(event: PopupEvent) -> Self {
            Event(event)
        }
    }

    struct Fixture {
        host: FakeHost,
        dispatcher: Dispatcher<Event>,
        store: PopupStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                host: FakeHost::new(),
                dispatcher: Dispatcher::new("CopilotChatMapping", "CopilotChatAutocmd"),
                store: PopupStore::new(),
            }
        }

        fn popup(&mut self, title: &str) -> PopupId {
            self.store
                .create(
                    &mut self.host,
                    &mut self.dispatcher,
                    PopUpBuilder::new().title(title),
                )
                .unwrap()
        }
    }

    fn row_of(children: Vec<LayoutBox>, sizes: &[&str], width: i64) -> LayoutBox {
        let mut root = LayoutBox::boxes(children)
            .size(sizes.iter().copied())
            .direction(Direction::Row);
        root.set_base_dimensions(width, 20, 0, 0, Relative::Editor);
        root
    }

    fn child_widths(root: &LayoutBox) -> Vec<(i64, i64)> {
        match root.items() {
            BoxItems::Boxes(children) => children
                .iter()
                .map(|c| {
                    let (w, _, _, col) = c.dimensions();
                    (w, col)
                })
                .collect(),
            BoxItems::Popups(_) => Vec::new(),
        }
    }

    #[test]
    fn test_row_split_sums_to_100() {
        let mut store = PopupStore::new();
        let mut root = row_of(vec![LayoutBox::empty(), LayoutBox::empty()], &["50%", "50%"], 100);
        root.process(&mut store).unwrap();

        // each child loses the border offset; the second starts after the first's border
        assert_eq!(child_widths(&root), vec![(48, 0), (48, 50)]);
    }

    #[test]
    fn test_row_split_three_children_with_gap() {
        let mut store = PopupStore::new();
        let mut root = row_of(
            vec![LayoutBox::empty(), LayoutBox::empty(), LayoutBox::empty()],
            &["25%", "25%", "50%"],
            80,
        )
        .gap(1);
        root.process(&mut store).unwrap();

        assert_eq!(child_widths(&root), vec![(17, 0), (17, 20), (37, 40)]);
        // last child ends inside the parent once its border is drawn
        let (w, col) = child_widths(&root)[2];
        assert!(col + w + 2 <= 80);
    }

    #[test]
    fn test_row_split_under_100_leaves_space() {
        let mut store = PopupStore::new();
        let mut root = row_of(vec![LayoutBox::empty(), LayoutBox::empty()], &["30", "30"], 100);
        root.process(&mut store).unwrap();

        let widths = child_widths(&root);
        assert_eq!(widths, vec![(28, 0), (28, 30)]);
        assert!(widths[1].1 + widths[1].0 + 2 < 100);
    }

    #[test]
    fn test_row_split_over_100_overflows() {
        let mut store = PopupStore::new();
        let mut root = row_of(vec![LayoutBox::empty(), LayoutBox::empty()], &["70%", "70%"], 100);
        root.process(&mut store).unwrap();

        let widths = child_widths(&root);
        assert_eq!(widths, vec![(68, 0), (68, 70)]);
        assert!(widths[1].1 + widths[1].0 > 100);
    }

    #[test]
    fn test_col_split_heights() {
        let mut store = PopupStore::new();
        let mut root = LayoutBox::boxes(vec![LayoutBox::empty(), LayoutBox::empty()])
            .size(["80%", "20%"])
            .direction(Direction::Col);
        root.set_base_dimensions(80, 30, 9, 9, Relative::Editor);
        root.process(&mut store).unwrap();

        let BoxItems::Boxes(children) = root.items() else {
            panic!("expected boxes");
        };
        assert_eq!(children[0].dimensions(), (80, 23, 9, 9));
        assert_eq!(children[1].dimensions(), (80, 5, 34, 9));
    }

    #[test]
    fn test_size_count_mismatch() {
        let mut store = PopupStore::new();
        let mut root = row_of(vec![LayoutBox::empty(), LayoutBox::empty()], &["100%"], 100);
        assert_eq!(
            root.process(&mut store),
            Err(LayoutError::SizeMismatch { sizes: 1, items: 2 })
        );
    }

    #[test]
    fn test_invalid_size() {
        let mut store = PopupStore::new();
        let mut root = row_of(vec![LayoutBox::empty()], &["wide"], 100);
        assert_eq!(
            root.process(&mut store),
            Err(LayoutError::InvalidSize("wide".to_string()))
        );
    }

    #[test]
    fn test_popups_receive_box_geometry() {
        let mut fx = Fixture::new();
        let a = fx.popup("A");
        let b = fx.popup("B");
        let mut root = row_of(
            vec![LayoutBox::popups(vec![a]), LayoutBox::popups(vec![b])],
            &["50%", "50%"],
            100,
        );
        root.process(&mut fx.store).unwrap();
        root.mount(&mut fx.host, &mut fx.store).unwrap();

        let cfg_a = fx.host.window_config(fx.store[a].window().unwrap()).unwrap();
        let cfg_b = fx.host.window_config(fx.store[b].window().unwrap()).unwrap();
        assert_eq!((cfg_a.width, cfg_a.col), (48, 0));
        assert_eq!((cfg_b.width, cfg_b.col), (48, 50));
        assert_eq!(cfg_a.title, "A");
    }

    fn two_pane_layout(fx: &mut Fixture) -> (Layout, PopupId, PopupId) {
        let left = fx.popup("Left");
        let right = fx.popup("Right");
        let layout = Layout::new(
            LayoutBox::boxes(vec![
                LayoutBox::popups(vec![left]),
                LayoutBox::popups(vec![right]),
            ])
            .size(["50%", "50%"]),
            "80%",
            "60%",
            "50%",
            "50%",
            Relative::Editor,
        );
        (layout, left, right)
    }

    #[test]
    fn test_layout_mount_centers_tree() {
        let mut fx = Fixture::new();
        let (mut layout, left, right) = two_pane_layout(&mut fx);

        layout.mount(&mut fx.host, &mut fx.store).unwrap();

        // 100x50 editor: 80x30 centered at (25, 50) -> origin (9, 9)
        assert_eq!(layout.root().dimensions(), (80, 30, 9, 9));
        let l = fx.host.window_config(fx.store[left].window().unwrap()).unwrap();
        let r = fx.host.window_config(fx.store[right].window().unwrap()).unwrap();
        assert_eq!((l.width, l.height, l.row, l.col), (38, 30, 9, 9));
        assert_eq!((r.width, r.height, r.row, r.col), (38, 30, 9, 49));
        assert!(layout.is_mounted());
        assert_eq!(layout.popups(), vec![left, right]);
    }

    #[test]
    fn test_remount_geometry_identical() {
        let mut fx = Fixture::new();
        let (mut layout, left, right) = two_pane_layout(&mut fx);

        layout.mount(&mut fx.host, &mut fx.store).unwrap();
        let first: Vec<_> = [left, right]
            .iter()
            .map(|id| fx.host.window_config(fx.store[*id].window().unwrap()).unwrap().clone())
            .collect();

        layout.unmount(&mut fx.host, &mut fx.store).unwrap();
        assert!(!layout.is_mounted());
        assert!(fx.host.floats().is_empty());

        layout.mount(&mut fx.host, &mut fx.store).unwrap();
        let second: Vec<_> = [left, right]
            .iter()
            .map(|id| fx.host.window_config(fx.store[*id].window().unwrap()).unwrap().clone())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_last_popup_refocused_on_mount() {
        let mut fx = Fixture::new();
        let (mut layout, left, right) = two_pane_layout(&mut fx);

        layout.mount(&mut fx.host, &mut fx.store).unwrap();
        layout.set_last_popup(left);
        layout.unmount(&mut fx.host, &mut fx.store).unwrap();
        layout.mount(&mut fx.host, &mut fx.store).unwrap();

        assert_eq!(layout.last_popup(), Some(left));
        assert_eq!(fx.host.current_win(), fx.store[left].window().unwrap());
        assert_ne!(fx.host.current_win(), fx.store[right].window().unwrap());
    }

    #[test]
    fn test_last_popup_ignored_while_mounting() {
        let mut fx = Fixture::new();
        let (mut layout, left, _) = two_pane_layout(&mut fx);

        layout.mounting = true;
        layout.set_last_popup(left);
        layout.mounting = false;
        assert_eq!(layout.last_popup(), None);

        layout.unmounting = true;
        layout.set_last_popup(left);
        layout.unmounting = false;
        assert_eq!(layout.last_popup(), None);

        layout.set_last_popup(left);
        assert_eq!(layout.last_popup(), Some(left));
    }

    #[test]
    fn test_first_mount_callback_runs_once() {
        let mut fx = Fixture::new();
        let (layout, _, _) = two_pane_layout(&mut fx);
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut layout = layout.on_first_mount(move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        layout.mount(&mut fx.host, &mut fx.store).unwrap();
        layout.unmount(&mut fx.host, &mut fx.store).unwrap();
        layout.mount(&mut fx.host, &mut fx.store).unwrap();

        assert_eq!(calls.get(), 1);
        assert!(layout.has_been_mounted());
    }

    #[test]
    fn test_invalid_dimension_fails_mount() {
        let mut fx = Fixture::new();
        let a = fx.popup("A");
        let mut layout = Layout::new(
            LayoutBox::popups(vec![a]),
            "80",
            10,
            0,
            0,
            Relative::Editor,
        );

        let err = layout.mount(&mut fx.host, &mut fx.store).unwrap_err();
        assert_eq!(
            err.downcast_ref::<LayoutError>(),
            Some(&LayoutError::InvalidDimension("80".to_string()))
        );
        assert!(!layout.is_mounted());
        assert!(fx.host.floats().is_empty());
    }
}
