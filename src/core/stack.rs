//! Per-call stack of active menu activations

use std::sync::Arc;

use super::menu::Menu;
use super::stream::DigitStream;

/// One activation of a menu on the stack.
#[derive(Debug)]
pub struct MenuFrame {
    menu: Arc<Menu>,
    failures: u32,
    visits: u32,
    stream: DigitStream,
}

impl MenuFrame {
    pub fn new(menu: Arc<Menu>) -> Self {
        let stream = menu.registry().stream();
        Self {
            menu,
            failures: 0,
            visits: 0,
            stream,
        }
    }

    pub fn menu(&self) -> &Arc<Menu> {
        &self.menu
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// (Re-)entry: the failure counter and greeting choice start over.
    pub fn enter(&mut self) {
        self.failures = 0;
        self.visits = 0;
        self.stream.reset();
    }

    /// Prompt for the next pass: the full greeting on the first pass of an
    /// activation, the short greeting afterwards.
    pub fn next_prompt(&mut self) -> Option<String> {
        let prompt = if self.visits == 0 {
            self.menu.greeting_sound()
        } else {
            self.menu.short_greeting_sound()
        };
        self.visits += 1;
        prompt.map(str::to_string)
    }

    /// Counts one timeout or invalid entry. Returns true once the menu's
    /// `max_failures` has been reached.
    pub fn record_failure(&mut self) -> bool {
        self.failures += 1;
        self.failures >= self.menu.max_failures()
    }

    pub fn stream_mut(&mut self) -> &mut DigitStream {
        &mut self.stream
    }

    pub fn stream_and_menu(&mut self) -> (&mut DigitStream, &Arc<Menu>) {
        (&mut self.stream, &self.menu)
    }
}

/// Ordered menu activations for one call; the last frame is executing.
///
/// The bottom frame is the call's main menu. It can never be popped by
/// navigation, so the stack is never empty.
#[derive(Debug)]
pub struct MenuStack {
    frames: Vec<MenuFrame>,
}

impl MenuStack {
    pub fn new(main: Arc<Menu>) -> Self {
        Self {
            frames: vec![MenuFrame::new(main)],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> &MenuFrame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn top_mut(&mut self) -> &mut MenuFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn bottom(&self) -> &MenuFrame {
        &self.frames[0]
    }

    pub fn push(&mut self, menu: Arc<Menu>) {
        self.frames.push(MenuFrame::new(menu));
    }

    /// Pops the top frame unless it is the bottom one.
    pub fn pop(&mut self) -> Option<MenuFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Removes every frame above the bottom one, returned bottom-up.
    pub fn collapse(&mut self) -> Vec<MenuFrame> {
        self.frames.split_off(1)
    }

    /// Menu names from bottom to top.
    pub fn names(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| frame.menu.name().to_string())
            .collect()
    }
}
