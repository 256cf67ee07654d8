//! Scripted chat app for tests.
//!
//! Renders a 1000x800 window (initially at (100, 50), movable) with a sidebar of groups, a list of
//! conversations for the selected group, a composer and a transcript. Captures
//! are synthesized from that state, OCR reads back the labels inside the last
//! captured region, and a virtual clock makes every wait instant.

use anyhow::{anyhow, bail, Result};
use image::{Rgba, RgbaImage};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{
    AppIdentity, Desktop, FocusedElement, Key, KeyChord, TextObservation, WindowHandle, WindowState,
};
use crate::config::{Config, GeometryConfig};
use crate::geometry::{Bounds, Point};

const DEFAULT_WINDOW: Bounds = Bounds::new(100, 50, 1000, 800);
const BACKGROUND: u8 = 249;
const HIGHLIGHT: u8 = 240;
const ROW_PITCH: i32 = 35;
/// First group row center, below the sidebar's top edge
const FIRST_GROUP_OFFSET: i32 = 115;
/// First conversation row center, below the content region's top edge
const FIRST_CONVERSATION_OFFSET: i32 = 20;
const SCROLL_PX_PER_LINE: i32 = 20;
const CHAR_WIDTH: u32 = 8;
const TEXT_HEIGHT: u32 = 16;
const TOGGLE_HIT: i32 = 12;
const CLOSE_BLOCK: u32 = 9;
const INPUT_SIZE: (u32, u32) = (600, 40);
const DEFAULT_TITLE: &str = "ChatGPT";

const SKIPPED_CONTROLS: [&str; 5] = ["Send", "Voice mode", "Tools", "Attach", "Scroll to bottom"];
const MESSAGE_CONTROLS: [&str; 6] = [
    "Read aloud",
    "Bad response",
    "Good response",
    "Copy",
    "Edit message",
    "Share",
];
const COPY_CONTROL: &str = "Copy";
/// Controls that change the conversation when pressed
const DESTRUCTIVE_CONTROLS: [&str; 5] = [
    "Read aloud",
    "Bad response",
    "Good response",
    "Edit message",
    "Share",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Nothing,
    Input,
    Transcript,
    Ring(usize),
}

struct State {
    elapsed: Duration,
    focus_thefts: Vec<Duration>,

    running: bool,
    window_open: bool,
    minimized: bool,
    foreground: bool,
    launches: u32,
    window_id: u64,
    terminations: u32,
    launch_failures: u32,
    activation_failures: u32,
    foreground_requests: u32,
    restores: u32,

    captures: u32,
    minimize_at_capture: Option<u32>,
    last_capture: Option<Bounds>,

    panel_open: bool,
    groups: Vec<String>,
    searchable_groups: Vec<String>,
    group_scroll: i32,
    conversations: Vec<String>,
    searchable_conversations: Vec<String>,
    conversation_pitch: i32,
    conversation_text_offset: i32,
    selected_group: Option<String>,
    selected_conversation: Option<String>,
    title: String,
    misreads: Vec<(String, String)>,
    search: Option<String>,

    generation: VecDeque<u32>,
    generation_script: Vec<u32>,
    replies: VecDeque<String>,
    transcript: Vec<String>,
    transcript_selected: bool,
    transcript_copy: bool,
    input: String,
    input_selected: bool,
    paste_corruptions: u32,
    submissions: Vec<String>,
    focus: Focus,
    focus_hidden: bool,
    ring: Vec<String>,
    copy_shortcut: bool,
    clipboard: Option<String>,

    clicks: Vec<Point>,
    keys: Vec<KeyChord>,
    destructive: Vec<String>,
    input_without_foreground: u32,
}

impl State {
    fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
            focus_thefts: Vec::new(),
            running: false,
            window_open: false,
            minimized: false,
            foreground: false,
            launches: 0,
            window_id: 0,
            terminations: 0,
            launch_failures: 0,
            activation_failures: 0,
            foreground_requests: 0,
            restores: 0,
            captures: 0,
            minimize_at_capture: None,
            last_capture: None,
            panel_open: false,
            groups: Vec::new(),
            searchable_groups: Vec::new(),
            group_scroll: 0,
            conversations: Vec::new(),
            searchable_conversations: Vec::new(),
            conversation_pitch: ROW_PITCH,
            conversation_text_offset: 0,
            selected_group: None,
            selected_conversation: None,
            title: DEFAULT_TITLE.to_string(),
            misreads: Vec::new(),
            search: None,
            generation: VecDeque::new(),
            generation_script: vec![200, 200, 200],
            replies: VecDeque::new(),
            transcript: Vec::new(),
            transcript_selected: false,
            transcript_copy: true,
            input: String::new(),
            input_selected: false,
            paste_corruptions: 0,
            submissions: Vec::new(),
            focus: Focus::Nothing,
            focus_hidden: false,
            ring: SKIPPED_CONTROLS
                .iter()
                .chain(MESSAGE_CONTROLS.iter())
                .map(|s| s.to_string())
                .collect(),
            copy_shortcut: false,
            clipboard: None,
            clicks: Vec::new(),
            keys: Vec::new(),
            destructive: Vec::new(),
            input_without_foreground: 0,
        }
    }

    fn usable(&self) -> bool {
        self.running && self.window_open
    }

    fn accepts_input(&self) -> bool {
        self.usable() && self.foreground && !self.minimized
    }

    /// What a fresh process shows: conversations persist, UI state does not.
    fn reset_ui(&mut self) {
        self.panel_open = false;
        self.group_scroll = 0;
        self.selected_group = None;
        self.selected_conversation = None;
        self.title = DEFAULT_TITLE.to_string();
        self.search = None;
        self.generation.clear();
        self.input.clear();
        self.input_selected = false;
        self.transcript_selected = false;
        self.focus = Focus::Nothing;
    }

    fn open_window(&mut self) {
        self.launches += 1;
        self.window_id = self.launches as u64;
        self.running = true;
        self.window_open = true;
        self.minimized = false;
        self.foreground = true;
        self.reset_ui();
    }

    fn last_message(&self) -> Option<String> {
        self.transcript.last().cloned()
    }

    fn read(&self, text: &str) -> String {
        self.misreads
            .iter()
            .find(|(from, _)| from == text)
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| text.to_string())
    }
}

pub(crate) struct FakeDesktop {
    state: RefCell<State>,
    /// Kept outside `state` so layout can be read while `state` is borrowed
    window: Cell<Bounds>,
    geometry: GeometryConfig,
    search_shortcut: Option<KeyChord>,
    copy_shortcut: Option<KeyChord>,
    base: Instant,
}

impl FakeDesktop {
    pub fn new(config: &Config) -> Self {
        Self {
            state: RefCell::new(State::new()),
            window: Cell::new(DEFAULT_WINDOW),
            geometry: config.geometry.clone(),
            search_shortcut: config.navigation.search_shortcut.parse().ok(),
            copy_shortcut: config.extraction.copy_shortcut.parse().ok(),
            base: Instant::now(),
        }
    }

    // ---- layout ----

    fn sidebar(&self) -> Bounds {
        self.geometry.sidebar.resolve(&self.window.get())
    }

    fn content(&self) -> Bounds {
        self.geometry.content.resolve(&self.window.get())
    }

    fn conversation_list_x(&self) -> (i32, i32) {
        (self.sidebar().right(), self.content().right())
    }

    fn group_center(&self, state: &State, index: usize) -> i32 {
        self.sidebar().y + FIRST_GROUP_OFFSET + index as i32 * ROW_PITCH - state.group_scroll
    }

    fn conversation_center(&self, state: &State, index: usize) -> i32 {
        self.content().y + FIRST_CONVERSATION_OFFSET + index as i32 * state.conversation_pitch
    }

    fn max_group_scroll(&self, state: &State) -> i32 {
        let Some(last) = state.groups.len().checked_sub(1) else {
            return 0;
        };
        let sidebar = self.sidebar();
        let bottom = sidebar.y + FIRST_GROUP_OFFSET + last as i32 * ROW_PITCH + ROW_PITCH;
        (bottom - sidebar.bottom()).max(0)
    }

    fn group_text_box(&self, state: &State, index: usize) -> Bounds {
        let label = &state.groups[index];
        Bounds::centered(
            Point::new(
                self.sidebar().x + 10 + (CHAR_WIDTH * label.len() as u32 / 2) as i32,
                self.group_center(state, index),
            ),
            CHAR_WIDTH * label.len() as u32,
            TEXT_HEIGHT,
        )
    }

    fn conversation_text_box(&self, state: &State, index: usize) -> Bounds {
        let label = &state.conversations[index];
        let width = CHAR_WIDTH * label.len() as u32;
        Bounds::centered(
            Point::new(
                self.sidebar().right() + 20 + (width / 2) as i32,
                self.conversation_center(state, index) + state.conversation_text_offset,
            ),
            width,
            TEXT_HEIGHT,
        )
    }

    fn input_rect(&self) -> Bounds {
        Bounds::centered(
            self.geometry.input.resolve(&self.window.get()),
            INPUT_SIZE.0,
            INPUT_SIZE.1,
        )
    }

    /// Visible labels in screen coordinates.
    fn labels(&self, state: &State) -> Vec<(String, Bounds)> {
        let mut labels = Vec::new();
        if state.panel_open {
            let sidebar = self.sidebar();
            for (i, group) in state.groups.iter().enumerate() {
                let bounds = self.group_text_box(state, i);
                if sidebar.contains(bounds.center()) {
                    labels.push((group.clone(), bounds));
                }
            }
        }
        if state.selected_group.is_some() {
            let content = self.content();
            for (i, conversation) in state.conversations.iter().enumerate() {
                let bounds = self.conversation_text_box(state, i);
                if content.contains(bounds.center()) {
                    labels.push((conversation.clone(), bounds));
                }
            }
        }
        labels
    }

    fn highlights(&self, state: &State) -> Vec<Bounds> {
        let mut rects = Vec::new();
        let band = (ROW_PITCH - 1) as u32;
        if state.panel_open {
            if let Some(i) = state
                .selected_group
                .as_ref()
                .and_then(|g| state.groups.iter().position(|x| x == g))
            {
                let sidebar = self.sidebar();
                let y = self.group_center(state, i);
                rects.push(Bounds::new(sidebar.x, y - band as i32 / 2, sidebar.width, band));
            }
        }
        if state.selected_group.is_some() {
            if let Some(i) = state
                .selected_conversation
                .as_ref()
                .and_then(|c| state.conversations.iter().position(|x| x == c))
            {
                let (left, right) = self.conversation_list_x();
                let y = self.conversation_center(state, i);
                rects.push(Bounds::new(left, y - band as i32 / 2, (right - left) as u32, band));
            }
        }
        rects
    }

    // ---- scripting ----

    pub fn launch_now(&self) {
        self.state.borrow_mut().open_window();
    }

    pub fn current_handle(&self) -> Option<WindowHandle> {
        let state = self.state.borrow();
        state.usable().then(|| WindowHandle {
            id: state.window_id,
            pid: 4242 + state.launches,
            bounds: self.window.get(),
            valid: true,
        })
    }

    pub fn close_window(&self) {
        let mut state = self.state.borrow_mut();
        state.window_open = false;
        state.foreground = false;
    }

    /// Move or resize the window; handles keep whatever bounds they last saw.
    pub fn move_window(&self, bounds: Bounds) {
        self.window.set(bounds);
    }

    pub fn set_minimized(&self, minimized: bool) {
        let mut state = self.state.borrow_mut();
        state.minimized = minimized;
        if minimized {
            state.foreground = false;
        }
    }

    pub fn lose_foreground(&self) {
        self.state.borrow_mut().foreground = false;
    }

    /// Take foreground away once the virtual clock passes `after`.
    pub fn steal_focus_after(&self, after: Duration) {
        self.state.borrow_mut().focus_thefts.push(after);
    }

    pub fn fail_activations(&self, count: u32) {
        self.state.borrow_mut().activation_failures = count;
    }

    pub fn fail_launches(&self, count: u32) {
        self.state.borrow_mut().launch_failures = count;
    }

    /// The `n`th capture from now minimizes the window and fails.
    pub fn minimize_on_capture(&self, n: u32) {
        let mut state = self.state.borrow_mut();
        state.minimize_at_capture = Some(state.captures + n);
    }

    pub fn set_panel_open(&self, open: bool) {
        self.state.borrow_mut().panel_open = open;
    }

    pub fn set_groups(&self, groups: &[&str]) {
        let mut state = self.state.borrow_mut();
        state.groups = groups.iter().map(|g| g.to_string()).collect();
        state.group_scroll = 0;
    }

    /// A group the search palette can jump to even though the list doesn't show it.
    pub fn add_searchable_group(&self, group: &str) {
        self.state.borrow_mut().searchable_groups.push(group.to_string());
    }

    pub fn set_conversations(&self, conversations: &[&str]) {
        self.state.borrow_mut().conversations =
            conversations.iter().map(|c| c.to_string()).collect();
    }

    pub fn add_searchable_conversation(&self, conversation: &str) {
        self.state
            .borrow_mut()
            .searchable_conversations
            .push(conversation.to_string());
    }

    /// Row pitch and vertical offset of each title from its row's center.
    pub fn set_conversation_layout(&self, pitch: i32, text_offset: i32) {
        let mut state = self.state.borrow_mut();
        state.conversation_pitch = pitch;
        state.conversation_text_offset = text_offset;
    }

    pub fn select_group_now(&self, group: &str) {
        let mut state = self.state.borrow_mut();
        state.selected_group = Some(group.to_string());
        state.title = group.to_string();
    }

    /// OCR reports `to` wherever `from` is drawn.
    pub fn misread(&self, from: &str, to: &str) {
        self.state
            .borrow_mut()
            .misreads
            .push((from.to_string(), to.to_string()));
    }

    /// Dark-pixel counts returned by the next generating-probe captures.
    pub fn queue_generation(&self, counts: &[u32]) {
        self.state.borrow_mut().generation.extend(counts.iter().copied());
    }

    /// Generation counts replayed after every submitted prompt.
    pub fn set_generation_script(&self, counts: &[u32]) {
        self.state.borrow_mut().generation_script = counts.to_vec();
    }

    /// The answer the app gives to the next submitted prompt.
    pub fn queue_reply(&self, reply: &str) {
        self.state.borrow_mut().replies.push_back(reply.to_string());
    }

    pub fn set_transcript(&self, messages: &[&str]) {
        self.state.borrow_mut().transcript = messages.iter().map(|m| m.to_string()).collect();
    }

    /// The next `count` pastes into the composer arrive mangled.
    pub fn corrupt_pastes(&self, count: u32) {
        self.state.borrow_mut().paste_corruptions = count;
    }

    pub fn remove_copy_control(&self) {
        self.state.borrow_mut().ring.retain(|c| c != COPY_CONTROL);
    }

    /// Accessibility stops describing the focused element.
    pub fn hide_focus_info(&self, hidden: bool) {
        self.state.borrow_mut().focus_hidden = hidden;
    }

    pub fn enable_copy_shortcut(&self, enabled: bool) {
        self.state.borrow_mut().copy_shortcut = enabled;
    }

    pub fn disable_transcript_copy(&self) {
        self.state.borrow_mut().transcript_copy = false;
    }

    pub fn set_clipboard(&self, text: Option<&str>) {
        self.state.borrow_mut().clipboard = text.map(str::to_string);
    }

    // ---- observations ----

    pub fn clipboard(&self) -> Option<String> {
        self.state.borrow().clipboard.clone()
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.state.borrow().clicks.clone()
    }

    pub fn keys(&self) -> Vec<KeyChord> {
        self.state.borrow().keys.clone()
    }

    pub fn foreground_requests(&self) -> u32 {
        self.state.borrow().foreground_requests
    }

    pub fn restores(&self) -> u32 {
        self.state.borrow().restores
    }

    pub fn launches(&self) -> u32 {
        self.state.borrow().launches
    }

    pub fn terminations(&self) -> u32 {
        self.state.borrow().terminations
    }

    pub fn selected_group(&self) -> Option<String> {
        self.state.borrow().selected_group.clone()
    }

    pub fn selected_conversation(&self) -> Option<String> {
        self.state.borrow().selected_conversation.clone()
    }

    pub fn submissions(&self) -> Vec<String> {
        self.state.borrow().submissions.clone()
    }

    pub fn input_text(&self) -> String {
        self.state.borrow().input.clone()
    }

    pub fn destructive_activations(&self) -> Vec<String> {
        self.state.borrow().destructive.clone()
    }

    /// Clicks and keystrokes that arrived while the window lacked foreground.
    pub fn input_without_foreground(&self) -> u32 {
        self.state.borrow().input_without_foreground
    }

    // ---- input handling ----

    fn handle_click(&self, state: &mut State, at: Point) {
        state.search = None;

        let toggle = self.geometry.panel_toggle.resolve(&self.window.get());
        if (at.x - toggle.x).abs() <= TOGGLE_HIT && (at.y - toggle.y).abs() <= TOGGLE_HIT {
            state.panel_open = !state.panel_open;
            return;
        }

        let sidebar = self.sidebar();
        if state.panel_open && sidebar.contains(at) {
            let hit = (0..state.groups.len()).find(|&i| {
                let center = self.group_center(state, i);
                sidebar.contains(Point::new(at.x, center)) && (at.y - center).abs() <= ROW_PITCH / 2
            });
            if let Some(i) = hit {
                let group = state.groups[i].clone();
                if state.selected_group.as_ref() != Some(&group) {
                    state.selected_conversation = None;
                }
                state.title = group.clone();
                state.selected_group = Some(group);
            }
            return;
        }

        let content = self.content();
        let (list_left, list_right) = self.conversation_list_x();
        if state.selected_group.is_some()
            && content.contains(at)
            && (list_left..list_right).contains(&at.x)
        {
            let hit = (0..state.conversations.len()).find(|&i| {
                let center = self.conversation_center(state, i);
                let text = self.conversation_text_box(state, i);
                (at.y - center).abs() <= state.conversation_pitch / 2
                    && at.x >= text.x - 10
                    && at.x <= text.right() + 10
            });
            if let Some(i) = hit {
                let conversation = state.conversations[i].clone();
                state.title = conversation.clone();
                state.selected_conversation = Some(conversation);
                return;
            }
        }

        if self.input_rect().contains(at) {
            state.focus = Focus::Input;
            state.input_selected = false;
        } else {
            state.focus = Focus::Transcript;
            state.transcript_selected = false;
        }
    }

    fn handle_search_key(&self, state: &mut State, chord: KeyChord) {
        if chord == KeyChord::PASTE {
            state.search = Some(state.clipboard.clone().unwrap_or_default());
        } else if chord == KeyChord::plain(Key::Escape) {
            state.search = None;
        } else if chord == KeyChord::plain(Key::Enter) {
            let query = state.search.clone().unwrap_or_default().to_lowercase();
            let same = |name: &&String| name.to_lowercase() == query;
            if let Some(group) = state
                .groups
                .iter()
                .chain(state.searchable_groups.iter())
                .find(same)
                .cloned()
            {
                state.title = group.clone();
                state.selected_group = Some(group);
                state.selected_conversation = None;
                state.search = None;
            } else if let Some(conversation) = state
                .conversations
                .iter()
                .chain(state.searchable_conversations.iter())
                .find(same)
                .cloned()
            {
                state.title = conversation.clone();
                state.selected_conversation = Some(conversation);
                state.search = None;
            }
        }
    }

    fn submit(&self, state: &mut State) {
        let prompt = std::mem::take(&mut state.input);
        state.input_selected = false;
        state.submissions.push(prompt.clone());
        state.transcript.push(prompt);
        if let Some(reply) = state.replies.pop_front() {
            state.transcript.push(reply);
        }
        state.generation = state.generation_script.iter().copied().collect();
    }

    fn handle_input_key(&self, state: &mut State, chord: KeyChord) {
        if chord == KeyChord::PASTE {
            let mut text = state.clipboard.clone().unwrap_or_default();
            if state.paste_corruptions > 0 {
                state.paste_corruptions -= 1;
                text.pop();
                text.push('~');
            }
            if state.input_selected {
                state.input = text;
            } else {
                state.input.push_str(&text);
            }
            state.input_selected = false;
        } else if chord == KeyChord::SELECT_ALL {
            state.input_selected = !state.input.is_empty();
        } else if chord == KeyChord::COPY {
            if !state.input.is_empty() {
                state.clipboard = Some(state.input.clone());
            }
        } else if chord == KeyChord::plain(Key::Delete) {
            if state.input_selected {
                state.input.clear();
            } else {
                state.input.pop();
            }
            state.input_selected = false;
        } else if chord == KeyChord::plain(Key::Right) {
            state.input_selected = false;
        } else if chord == KeyChord::plain(Key::Enter) {
            if !state.input.trim().is_empty() {
                self.submit(state);
            }
        } else if chord == KeyChord::SHIFT_TAB && !state.ring.is_empty() {
            state.focus = Focus::Ring(0);
        }
    }

    fn handle_ring_key(&self, state: &mut State, index: usize, chord: KeyChord) {
        if chord == KeyChord::SHIFT_TAB {
            state.focus = if index + 1 < state.ring.len() {
                Focus::Ring(index + 1)
            } else {
                Focus::Input
            };
            return;
        }
        if chord != KeyChord::plain(Key::Enter) && chord != KeyChord::plain(Key::Space) {
            return;
        }
        let control = state.ring[index].clone();
        if control == COPY_CONTROL {
            if let Some(message) = state.last_message() {
                state.clipboard = Some(message);
            }
        } else if DESTRUCTIVE_CONTROLS.contains(&control.as_str()) {
            state.destructive.push(control);
        }
    }

    fn handle_transcript_key(&self, state: &mut State, chord: KeyChord) {
        if chord == KeyChord::SELECT_ALL {
            state.transcript_selected = true;
        } else if chord == KeyChord::COPY {
            if state.transcript_selected && state.transcript_copy && !state.transcript.is_empty() {
                state.clipboard = Some(state.transcript.join("\n\n"));
            }
        } else if chord == KeyChord::SHIFT_TAB {
            state.focus = Focus::Input;
        }
    }
}

impl Desktop for FakeDesktop {
    fn find_window(&self, _app: &AppIdentity) -> Result<Option<WindowHandle>> {
        Ok(self.current_handle())
    }

    fn window_state(&self, handle: &WindowHandle) -> WindowState {
        let state = self.state.borrow();
        if !state.usable() || handle.id != state.window_id {
            return WindowState::gone();
        }
        WindowState {
            exists: true,
            minimized: state.minimized,
            visible: !state.minimized,
            bounds: Some(self.window.get()),
        }
    }

    fn is_foreground(&self, handle: &WindowHandle) -> bool {
        let state = self.state.borrow();
        state.accepts_input() && handle.id == state.window_id
    }

    fn activate(&self, handle: &WindowHandle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.foreground_requests += 1;
        if state.activation_failures > 0 {
            state.activation_failures -= 1;
            bail!("activation refused");
        }
        if !state.usable() || handle.id != state.window_id {
            bail!("no such window");
        }
        if !state.minimized {
            state.foreground = true;
        }
        Ok(())
    }

    fn raise(&self, handle: &WindowHandle) -> Result<()> {
        self.activate(handle)
    }

    fn restore(&self, handle: &WindowHandle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.usable() || handle.id != state.window_id {
            bail!("no such window");
        }
        state.restores += 1;
        state.minimized = false;
        Ok(())
    }

    fn window_title(&self, handle: &WindowHandle) -> Option<String> {
        let state = self.state.borrow();
        (state.usable() && handle.id == state.window_id).then(|| state.title.clone())
    }

    fn is_app_running(&self, _app: &AppIdentity) -> bool {
        self.state.borrow().running
    }

    fn terminate_app(&self, _app: &AppIdentity) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if !state.running {
            return Ok(0);
        }
        state.running = false;
        state.window_open = false;
        state.foreground = false;
        state.terminations += 1;
        state.reset_ui();
        Ok(1)
    }

    fn launch_app(&self, app: &AppIdentity) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            bail!("unable to find application named '{}'", app.name);
        }
        state.open_window();
        Ok(())
    }

    fn capture(&self, handle: &WindowHandle, region: Bounds) -> Result<RgbaImage> {
        let mut state = self.state.borrow_mut();
        if !state.usable() || handle.id != state.window_id {
            bail!("window {} not found", handle.id);
        }
        if state.minimized {
            bail!("window is minimized");
        }
        state.captures += 1;
        if state.minimize_at_capture == Some(state.captures) {
            state.minimize_at_capture = None;
            state.minimized = true;
            state.foreground = false;
            bail!("window was minimized during capture");
        }
        if region.is_empty() {
            bail!("empty capture region");
        }

        let mut image = RgbaImage::from_pixel(
            region.width,
            region.height,
            Rgba([BACKGROUND, BACKGROUND, BACKGROUND, 255]),
        );
        let mut paint = |rect: Bounds, level: u8| {
            if let Some(overlap) = region.intersect(&rect) {
                for y in overlap.y..overlap.bottom() {
                    for x in overlap.x..overlap.right() {
                        image.put_pixel(
                            (x - region.x) as u32,
                            (y - region.y) as u32,
                            Rgba([level, level, level, 255]),
                        );
                    }
                }
            }
        };

        for rect in self.highlights(&state) {
            paint(rect, HIGHLIGHT);
        }
        if state.panel_open {
            let close = self.geometry.panel_close_probe.center.resolve(&self.window.get());
            paint(Bounds::centered(close, CLOSE_BLOCK, CLOSE_BLOCK), 0);
        }

        let probe = self.geometry.generating_probe.resolve(&self.window.get());
        if region.intersect(&probe).is_some() {
            let dark = state.generation.pop_front().unwrap_or(0);
            let area = probe.width * probe.height;
            for i in 0..dark.min(area) {
                let pixel = Bounds::new(
                    probe.x + (i % probe.width) as i32,
                    probe.y + (i / probe.width) as i32,
                    1,
                    1,
                );
                paint(pixel, 0);
            }
        }

        state.last_capture = Some(region);
        Ok(image)
    }

    fn recognize_text(&self, image: &RgbaImage) -> Result<Vec<TextObservation>> {
        let state = self.state.borrow();
        let region = state
            .last_capture
            .ok_or_else(|| anyhow!("nothing captured yet"))?;
        if region.width != image.width() || region.height != image.height() {
            bail!("image does not match the last capture");
        }
        Ok(self
            .labels(&state)
            .into_iter()
            .filter(|(_, bounds)| region.contains(bounds.center()))
            .map(|(text, bounds)| TextObservation {
                text: state.read(&text),
                bounds: Bounds::new(
                    bounds.x - region.x,
                    bounds.y - region.y,
                    bounds.width,
                    bounds.height,
                ),
                confidence: 0.9,
            })
            .collect())
    }

    fn click(&self, at: Point) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.clicks.push(at);
        if !state.accepts_input() {
            state.input_without_foreground += 1;
            return Ok(());
        }
        self.handle_click(&mut state, at);
        Ok(())
    }

    fn scroll(&self, at: Point, lines: i32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.accepts_input() {
            state.input_without_foreground += 1;
            return Ok(());
        }
        if state.panel_open && self.sidebar().contains(at) {
            let max = self.max_group_scroll(&state);
            state.group_scroll = (state.group_scroll + lines * SCROLL_PX_PER_LINE).clamp(0, max);
        }
        Ok(())
    }

    fn press(&self, chord: KeyChord) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.keys.push(chord);
        if !state.accepts_input() {
            state.input_without_foreground += 1;
            return Ok(());
        }

        if state.search.is_some() {
            self.handle_search_key(&mut state, chord);
            return Ok(());
        }
        if Some(chord) == self.search_shortcut {
            state.search = Some(String::new());
            return Ok(());
        }
        if Some(chord) == self.copy_shortcut {
            if state.copy_shortcut {
                if let Some(message) = state.last_message() {
                    state.clipboard = Some(message);
                }
            }
            return Ok(());
        }

        match state.focus {
            Focus::Input => self.handle_input_key(&mut state, chord),
            Focus::Ring(index) => self.handle_ring_key(&mut state, index, chord),
            Focus::Transcript => self.handle_transcript_key(&mut state, chord),
            Focus::Nothing => {
                if chord.modifiers.is_empty() && chord.key == Key::Tab {
                    state.focus = Focus::Input;
                }
            }
        }
        Ok(())
    }

    fn focused_element(&self) -> Option<FocusedElement> {
        let state = self.state.borrow();
        if state.focus_hidden {
            return None;
        }
        match state.focus {
            Focus::Nothing => None,
            Focus::Input => Some(FocusedElement {
                role: "AXTextArea".into(),
                name: "Message".into(),
                editable: true,
            }),
            Focus::Transcript => Some(FocusedElement {
                role: "AXGroup".into(),
                name: "Conversation".into(),
                editable: false,
            }),
            Focus::Ring(index) => Some(FocusedElement {
                role: "AXButton".into(),
                name: state.ring[index].clone(),
                editable: false,
            }),
        }
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        Ok(self.state.borrow().clipboard.clone())
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        self.state.borrow_mut().clipboard = Some(text.to_string());
        Ok(())
    }

    fn now(&self) -> Instant {
        self.base + self.state.borrow().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        state.elapsed += duration;
        let now = state.elapsed;
        let before = state.focus_thefts.len();
        state.focus_thefts.retain(|at| *at > now);
        if state.focus_thefts.len() < before {
            state.foreground = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::Modifiers;

    #[test]
    fn test_layout_matches_default_geometry() {
        let fake = FakeDesktop::new(&Config::default());
        assert_eq!(fake.sidebar(), Bounds::new(100, 85, 280, 725));
        assert_eq!(fake.content(), Bounds::new(220, 290, 760, 360));
        assert_eq!(fake.conversation_list_x(), (380, 980));
    }

    #[test]
    fn test_panel_probe_sees_close_block_only_when_open() {
        let config = Config::default();
        let fake = FakeDesktop::new(&config);
        fake.launch_now();
        let handle = fake.current_handle().unwrap();
        let probe = config.geometry.panel_close_probe.resolve(&DEFAULT_WINDOW);

        let closed = fake.capture(&handle, probe).unwrap();
        assert!(closed.pixels().all(|p| p.0[0] == BACKGROUND));

        fake.set_panel_open(true);
        let open = fake.capture(&handle, probe).unwrap();
        let dark = open.pixels().filter(|p| p.0[0] == 0).count();
        assert_eq!(dark, (CLOSE_BLOCK * CLOSE_BLOCK) as usize);
    }

    #[test]
    fn test_moved_window_carries_layout_with_it() {
        let fake = FakeDesktop::new(&Config::default());
        fake.launch_now();
        fake.move_window(Bounds::new(300, 250, 1000, 800));
        assert_eq!(fake.sidebar(), Bounds::new(300, 285, 280, 725));
        let handle = fake.current_handle().unwrap();
        assert_eq!(handle.bounds, Bounds::new(300, 250, 1000, 800));
        assert_eq!(fake.window_state(&handle).bounds, Some(handle.bounds));
    }

    #[test]
    fn test_input_is_dropped_without_foreground() {
        let fake = FakeDesktop::new(&Config::default());
        fake.launch_now();
        fake.lose_foreground();
        fake.press(KeyChord::PASTE).unwrap();
        assert_eq!(fake.input_without_foreground(), 1);
        assert!(fake.input_text().is_empty());
    }

    #[test]
    fn test_shortcut_chords_use_command_modifier() {
        let fake = FakeDesktop::new(&Config::default());
        assert_eq!(fake.search_shortcut, Some(KeyChord::command('k')));
        assert_eq!(
            fake.copy_shortcut,
            Some(KeyChord::new(
                Key::Char('c'),
                Modifiers::COMMAND | Modifiers::SHIFT
            ))
        );
    }
}
