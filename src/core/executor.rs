//! Menu stack executor
//!
//! Drives one call through a tree of menus. Each level cycles through
//! `Enter -> Prompt -> Collect -> Dispatch` until an action ends the flow,
//! and navigation (sub-menu, back, top) edits an explicit [`MenuStack`]
//! instead of recursing.
//!
//! The executor only suspends while a capability call or a digit wait is in
//! flight. Every suspension races the call's cancellation token; on hangup
//! the executor drops its stack and stream and reports
//! [`MenuOutcome::ChannelGone`] without touching the channel again.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::binding::{Binding, CallbackContext, MenuAction};
use super::context::{CallContext, IvrEvent};
use super::menu::{Menu, MenuCatalog};
use super::registry::FeedResult;
use super::stack::MenuStack;
use crate::interfaces::{DigitEvent, PlayOutcome};
use crate::{Error, Result};

/// How a menu flow ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MenuOutcome {
    /// The main menu was exited through a `menu-exit` binding.
    Completed,
    /// The main menu ran out of retries.
    MaxFailuresExceeded { menu: String },
    /// The call was handed to the dialplan; the channel lives on elsewhere.
    Transferred {
        extension: String,
        dialplan: String,
        context: String,
    },
    /// The call ended while the flow was running.
    ChannelGone,
}

/// Runs the menu flow for one call, starting at `entry`.
///
/// `entry` becomes the bottom of the call's stack, the menu that
/// `menu-top` returns to. Fails only when `entry` is not in the catalog;
/// hangups, exhausted retries and transfers are all reported as outcomes.
pub async fn execute(catalog: &MenuCatalog, entry: &str, ctx: CallContext) -> Result<MenuOutcome> {
    let main = catalog
        .get(entry)
        .ok_or_else(|| Error::menu_not_found(entry))?;
    let span = info_span!("ivr", call_id = %ctx.call_id, entry = entry);
    MenuExecutor::new(catalog, ctx, main).run().instrument(span).await
}

#[derive(Debug)]
enum Phase {
    Enter,
    Prompt,
    Collect(String),
    Dispatch {
        action: MenuAction,
        digits: Option<String>,
        exhausted: bool,
    },
    Exit(MenuOutcome),
}

async fn suspend<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::ChannelGone),
        out = fut => Ok(out),
    }
}

struct MenuExecutor<'a> {
    catalog: &'a MenuCatalog,
    ctx: CallContext,
    stack: MenuStack,
    /// Digits reported by an interrupted playback that have not been fed yet.
    pending: VecDeque<char>,
}

impl<'a> MenuExecutor<'a> {
    fn new(catalog: &'a MenuCatalog, ctx: CallContext, main: Arc<Menu>) -> Self {
        Self {
            catalog,
            ctx,
            stack: MenuStack::new(main),
            pending: VecDeque::new(),
        }
    }

    async fn run(mut self) -> Result<MenuOutcome> {
        let result = self.drive().await;
        match result {
            Err(Error::ChannelGone) => {
                info!(
                    "Channel gone, releasing {} menu level(s): {}",
                    self.stack.depth(),
                    self.stack.names().join(" > ")
                );
                Ok(MenuOutcome::ChannelGone)
            }
            Ok(outcome) => {
                info!("Menu flow finished: {:?}", outcome);
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&mut self) -> Result<MenuOutcome> {
        let mut phase = Phase::Enter;
        loop {
            if self.ctx.is_hung_up() {
                return Err(Error::ChannelGone);
            }
            trace!("{} -> {:?}", self.stack.top().menu().name(), phase);

            phase = match phase {
                Phase::Enter => self.enter(),
                Phase::Prompt => self.prompt().await?,
                Phase::Collect(early) => self.collect(early).await?,
                Phase::Dispatch {
                    action,
                    digits,
                    exhausted,
                } => self.dispatch(action, digits, exhausted).await?,
                Phase::Exit(outcome) => {
                    self.exit(&outcome).await?;
                    return Ok(outcome);
                }
            };
        }
    }

    fn menu(&self) -> Arc<Menu> {
        Arc::clone(self.stack.top().menu())
    }

    fn enter(&mut self) -> Phase {
        self.stack.top_mut().enter();
        let menu = self.menu();
        debug!("Entering menu {} at depth {}", menu.name(), self.stack.depth());
        self.ctx.emit(IvrEvent::MenuEntered {
            call_id: self.ctx.call_id.clone(),
            menu: menu.name().to_string(),
            depth: self.stack.depth(),
        });
        Phase::Prompt
    }

    async fn prompt(&mut self) -> Result<Phase> {
        match self.stack.top_mut().next_prompt() {
            Some(uri) => match self.play(&uri).await? {
                PlayOutcome::InterruptedWithDigits(digits) => {
                    debug!("Prompt {} interrupted by {}", uri, digits);
                    Ok(Phase::Collect(digits))
                }
                _ => Ok(Phase::Collect(String::new())),
            },
            None => Ok(Phase::Collect(String::new())),
        }
    }

    async fn play(&self, uri: &str) -> Result<PlayOutcome> {
        let channel = Arc::clone(&self.ctx.channel);
        match suspend(&self.ctx.cancel, channel.play_prompt(uri)).await? {
            PlayOutcome::ChannelGone => Err(Error::ChannelGone),
            outcome => Ok(outcome),
        }
    }

    /// Feeds type-ahead digits first, then waits on the call's queue.
    /// Type-ahead left over after a match or an invalid entry is kept for
    /// the next collection, exactly like digits still sitting in the queue.
    async fn collect(&mut self, early: String) -> Result<Phase> {
        self.pending.extend(early.chars());
        while let Some(digit) = self.pending.pop_front() {
            if let Some(phase) = self.feed(digit).await? {
                return Ok(phase);
            }
        }

        let timeout = self.menu().timeout();
        loop {
            let event = suspend(&self.ctx.cancel, self.ctx.digits.next_digit(timeout)).await?;
            match event {
                DigitEvent::Digit(digit) => {
                    if let Some(phase) = self.feed(digit).await? {
                        return Ok(phase);
                    }
                }
                DigitEvent::Timeout => {
                    let menu = self.menu();
                    let expired = menu.registry().expire(self.stack.top_mut().stream_mut());
                    return match expired {
                        FeedResult::Matched { binding, digits } => Ok(self.resolve(&binding, digits)),
                        _ => self.fail("timeout").await,
                    };
                }
                DigitEvent::ChannelGone => return Err(Error::ChannelGone),
            }
        }
    }

    async fn feed(&mut self, digit: char) -> Result<Option<Phase>> {
        let result = {
            let (stream, menu) = self.stack.top_mut().stream_and_menu();
            menu.registry().feed(stream, digit)
        };
        match result {
            FeedResult::Matched { binding, digits } => Ok(Some(self.resolve(&binding, digits))),
            FeedResult::Pending => Ok(None),
            FeedResult::NoMatch => self.fail("invalid input").await.map(Some),
        }
    }

    /// Turns a matched binding into the action to dispatch. Callback
    /// failures are logged and degrade to a no-op.
    fn resolve(&self, binding: &Binding, digits: String) -> Phase {
        let menu = self.menu();
        let action = match binding {
            Binding::Action { kind, arg } => MenuAction::from_kind(*kind, arg).unwrap_or_else(|e| {
                warn!("Menu {} binding {} is unusable: {}", menu.name(), digits, e);
                MenuAction::Noop
            }),
            Binding::Callback { handle, arg } => {
                let cb_ctx = CallbackContext {
                    call_id: &self.ctx.call_id,
                    menu: menu.name(),
                    digits: &digits,
                    user_data: self.ctx.user_data.as_deref(),
                };
                self.catalog
                    .callbacks()
                    .resolve(handle, &cb_ctx, arg)
                    .unwrap_or_else(|e| {
                        warn!("{}; treating as no-op", e);
                        self.ctx.emit(IvrEvent::Error {
                            call_id: Some(self.ctx.call_id.clone()),
                            message: e.to_string(),
                        });
                        MenuAction::Noop
                    })
            }
        };
        debug!("Menu {} matched {} -> {:?}", menu.name(), digits, action);
        Phase::Dispatch {
            action,
            digits: Some(digits),
            exhausted: false,
        }
    }

    /// Counts a timeout or invalid entry against the current menu.
    async fn fail(&mut self, reason: &str) -> Result<Phase> {
        let menu = self.menu();
        self.stack.top_mut().stream_mut().reset();
        if let Some(uri) = menu.invalid_sound() {
            self.play(uri).await?;
        }

        let exhausted = self.stack.top_mut().record_failure();
        debug!(
            "Menu {} {} ({}/{})",
            menu.name(),
            reason,
            self.stack.top().failures(),
            menu.max_failures()
        );
        if exhausted {
            info!("Menu {} reached {} failures", menu.name(), menu.max_failures());
            Ok(Phase::Dispatch {
                action: MenuAction::Terminate,
                digits: None,
                exhausted: true,
            })
        } else {
            Ok(Phase::Prompt)
        }
    }

    async fn dispatch(&mut self, action: MenuAction, digits: Option<String>, exhausted: bool) -> Result<Phase> {
        let menu = self.menu();
        self.ctx.emit(IvrEvent::ActionDispatched {
            call_id: self.ctx.call_id.clone(),
            menu: menu.name().to_string(),
            action: action.kind(),
            digits,
        });

        match action {
            MenuAction::Terminate => {
                if self.stack.depth() > 1 {
                    self.leave(true).await?;
                    Ok(Phase::Prompt)
                } else if exhausted {
                    Ok(Phase::Exit(MenuOutcome::MaxFailuresExceeded {
                        menu: menu.name().to_string(),
                    }))
                } else {
                    Ok(Phase::Exit(MenuOutcome::Completed))
                }
            }
            MenuAction::SubMenu(name) => {
                if self.stack.depth() >= self.ctx.max_depth {
                    warn!(
                        "Menu {} not entered: stack already {} deep",
                        name,
                        self.stack.depth()
                    );
                    return Ok(Phase::Prompt);
                }
                match self.catalog.get(&name) {
                    Some(sub) => {
                        self.stack.push(sub);
                        Ok(Phase::Enter)
                    }
                    None => {
                        warn!("Menu {} refers to unknown menu {}", menu.name(), name);
                        Ok(Phase::Prompt)
                    }
                }
            }
            MenuAction::ExecApp { name, args } => {
                let control = Arc::clone(&self.ctx.control);
                match suspend(&self.ctx.cancel, control.run_application(&name, &args)).await? {
                    Err(Error::ChannelGone) => return Err(Error::ChannelGone),
                    Err(e) => warn!("Application {} failed: {}", name, e),
                    Ok(()) => debug!("Application {} completed", name),
                }
                Ok(Phase::Prompt)
            }
            MenuAction::PlaySound(uri) => match self.play(&uri).await? {
                PlayOutcome::InterruptedWithDigits(digits) => Ok(Phase::Collect(digits)),
                _ => Ok(Phase::Prompt),
            },
            MenuAction::SayText(text) => {
                let channel = Arc::clone(&self.ctx.channel);
                let speech = channel.speak_text(menu.tts_engine(), menu.tts_voice(), &text);
                match suspend(&self.ctx.cancel, speech).await? {
                    Err(Error::ChannelGone) => return Err(Error::ChannelGone),
                    Err(e) => warn!("Speech failed in menu {}: {}", menu.name(), e),
                    Ok(()) => {}
                }
                Ok(Phase::Prompt)
            }
            MenuAction::Back => {
                if self.stack.depth() > 1 {
                    self.leave(false).await?;
                } else {
                    debug!("menu-back at main menu {} ignored", menu.name());
                }
                Ok(Phase::Prompt)
            }
            MenuAction::ToMain => {
                let popped = self.stack.collapse();
                if !popped.is_empty() {
                    debug!("Returned to main menu, {} level(s) discarded", popped.len());
                }
                for (level, frame) in popped.iter().enumerate().rev() {
                    self.ctx.emit(IvrEvent::MenuExited {
                        call_id: self.ctx.call_id.clone(),
                        menu: frame.menu().name().to_string(),
                        depth: level + 2,
                    });
                }
                Ok(Phase::Prompt)
            }
            MenuAction::Transfer {
                extension,
                dialplan,
                context,
            } => {
                let control = Arc::clone(&self.ctx.control);
                let transfer = control.transfer(&extension, &dialplan, &context);
                match suspend(&self.ctx.cancel, transfer).await? {
                    Ok(()) => {
                        info!("Transferred to {} {} {}", extension, dialplan, context);
                        Ok(Phase::Exit(MenuOutcome::Transferred {
                            extension,
                            dialplan,
                            context,
                        }))
                    }
                    Err(Error::ChannelGone) => Err(Error::ChannelGone),
                    Err(e) => {
                        warn!("Transfer to {} failed: {}", extension, e);
                        Ok(Phase::Prompt)
                    }
                }
            }
            MenuAction::Noop => Ok(Phase::Prompt),
        }
    }

    /// Pops the top level. `menu-exit` plays the level's exit sound on the
    /// way out; `menu-back` leaves silently.
    async fn leave(&mut self, play_exit: bool) -> Result<()> {
        let depth = self.stack.depth();
        if let Some(frame) = self.stack.pop() {
            let menu = Arc::clone(frame.menu());
            drop(frame);
            debug!("Leaving menu {}", menu.name());
            self.ctx.emit(IvrEvent::MenuExited {
                call_id: self.ctx.call_id.clone(),
                menu: menu.name().to_string(),
                depth,
            });
            if play_exit {
                if let Some(uri) = menu.exit_sound() {
                    self.play(uri).await?;
                }
            }
        }
        Ok(())
    }

    async fn exit(&mut self, outcome: &MenuOutcome) -> Result<()> {
        let menu = self.menu();
        self.ctx.emit(IvrEvent::MenuExited {
            call_id: self.ctx.call_id.clone(),
            menu: menu.name().to_string(),
            depth: self.stack.depth(),
        });
        if matches!(outcome, MenuOutcome::Transferred { .. }) {
            return Ok(());
        }
        if let Some(uri) = menu.exit_sound() {
            self.play(uri).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::binding::ActionKind;
    use crate::testing::{ChannelOp, ScriptedCall};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn catalog() -> MenuCatalog {
        let catalog = MenuCatalog::new();
        let main = catalog.insert(
            Menu::builder("main")
                .greeting("main/greeting.wav")
                .short_greeting("main/short.wav")
                .exit_sound("main/bye.wav")
                .invalid_sound("main/invalid.wav")
                .tts("flite", "kal")
                .timeout(Duration::from_secs(5))
                .max_failures(3)
                .build()
                .unwrap(),
        );
        main.bind_action(ActionKind::SubMenu, "sales", "1").unwrap();
        main.bind_action(ActionKind::SubMenu, "nowhere", "3").unwrap();
        main.bind_action(ActionKind::ExecApp, "voicemail check 100", "5").unwrap();
        main.bind_action(ActionKind::SayText, "Open nine to five", "7").unwrap();
        main.bind_action(ActionKind::Terminate, "", "9").unwrap();
        main.bind_action(ActionKind::Transfer, "1000", "0").unwrap();
        main.bind_action(ActionKind::Back, "", "*").unwrap();

        let sales = catalog.insert(
            Menu::builder("sales")
                .greeting("sales/greeting.wav")
                .exit_sound("sales/bye.wav")
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
        );
        sales.bind_action(ActionKind::SubMenu, "sales-eu", "1").unwrap();
        sales.bind_action(ActionKind::Terminate, "", "9").unwrap();
        sales.bind_action(ActionKind::Back, "", "*").unwrap();

        let eu = catalog.insert(
            Menu::builder("sales-eu")
                .greeting("eu/greeting.wav")
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
        );
        eu.bind_action(ActionKind::ToMain, "", "0").unwrap();
        eu.bind_action(ActionKind::Back, "", "*").unwrap();

        catalog
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<IvrEvent>) -> Vec<IvrEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn dispatched(events: &[IvrEvent]) -> Vec<(ActionKind, Option<String>)> {
        events
            .iter()
            .filter_map(|event| match event {
                IvrEvent::ActionDispatched { action, digits, .. } => Some((*action, digits.clone())),
                _ => None,
            })
            .collect()
    }

    fn entered(events: &[IvrEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                IvrEvent::MenuEntered { menu, .. } => Some(menu.clone()),
                _ => None,
            })
            .collect()
    }

    fn call_with_events(call_id: &str) -> (ScriptedCall, mpsc::UnboundedReceiver<IvrEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut call = ScriptedCall::new(call_id);
        call.context = call.context.with_events(tx);
        (call, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_failures_terminates_once() {
        let catalog = catalog();
        let (call, mut rx) = call_with_events("call-1");
        let ScriptedCall {
            context,
            digits: _digits,
            channel,
            ..
        } = call;

        let outcome = execute(&catalog, "main", context).await.unwrap();
        assert_eq!(
            outcome,
            MenuOutcome::MaxFailuresExceeded {
                menu: "main".to_string()
            }
        );

        let events = drain(&mut rx);
        let terminations: Vec<_> = dispatched(&events)
            .into_iter()
            .filter(|(kind, _)| *kind == ActionKind::Terminate)
            .collect();
        assert_eq!(terminations, vec![(ActionKind::Terminate, None)]);
        assert_eq!(
            channel.played(),
            vec![
                "main/greeting.wav",
                "main/invalid.wav",
                "main/short.wav",
                "main/invalid.wav",
                "main/short.wav",
                "main/invalid.wav",
                "main/bye.wav",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_digit_reprompts() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-invalid");
        call.digits.send_all("49").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec!["main/greeting.wav", "main/invalid.wav", "main/short.wav", "main/bye.wav"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_and_return_to_main() {
        let catalog = catalog();
        let (call, mut rx) = call_with_events("call-2");
        call.digits.send_all("1109").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec![
                "main/greeting.wav",
                "sales/greeting.wav",
                "eu/greeting.wav",
                "main/short.wav",
                "main/bye.wav",
            ]
        );
        let events = drain(&mut rx);
        assert_eq!(entered(&events), vec!["main", "sales", "sales-eu"]);

        let exited: Vec<(String, usize)> = events
            .iter()
            .filter_map(|event| match event {
                IvrEvent::MenuExited { menu, depth, .. } => Some((menu.clone(), *depth)),
                _ => None,
            })
            .collect();
        assert_eq!(
            exited,
            vec![
                ("sales-eu".to_string(), 3),
                ("sales".to_string(), 2),
                ("main".to_string(), 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submenu_exit_plays_exit_sound_and_back_does_not() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-3");
        call.digits.send_all("191*9").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec![
                "main/greeting.wav",
                "sales/greeting.wav",
                "sales/bye.wav",
                "main/short.wav",
                "sales/greeting.wav",
                "main/short.wav",
                "main/bye.wav",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_at_main_menu_is_ignored() {
        let catalog = catalog();
        let (call, mut rx) = call_with_events("call-4");
        call.digits.send_all("*9").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(entered(&drain(&mut rx)), vec!["main"]);
        assert_eq!(
            call.channel.played(),
            vec!["main/greeting.wav", "main/short.wav", "main/bye.wav"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_patterns_settle_on_timeout() {
        let catalog = MenuCatalog::new();
        let menu = catalog.insert(
            Menu::builder("ext")
                .greeting("ext/greeting.wav")
                .short_greeting("ext/short.wav")
                .timeout(Duration::from_secs(3))
                .build()
                .unwrap(),
        );
        menu.bind_action(ActionKind::PlaySound, "ext/one.wav", "1").unwrap();
        menu.bind_action(ActionKind::PlaySound, "ext/twelve.wav", "12").unwrap();
        menu.bind_action(ActionKind::Terminate, "", "9").unwrap();

        let (call, mut rx) = call_with_events("call-5");
        call.digits.send('1').unwrap();
        call.channel.interrupt("ext/short.wav", "12");
        call.channel.interrupt("ext/short.wav", "9");

        let outcome = execute(&catalog, "ext", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec![
                "ext/greeting.wav",
                "ext/one.wav",
                "ext/short.wav",
                "ext/twelve.wav",
                "ext/short.wav",
            ]
        );
        assert_eq!(
            dispatched(&drain(&mut rx)),
            vec![
                (ActionKind::PlaySound, Some("1".to_string())),
                (ActionKind::PlaySound, Some("12".to_string())),
                (ActionKind::Terminate, Some("9".to_string())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_pattern() {
        let catalog = MenuCatalog::new();
        let menu = catalog.insert(
            Menu::builder("pin")
                .greeting("pin/enter.wav")
                .terminator(Some('#'))
                .build()
                .unwrap(),
        );
        menu.bind_action(ActionKind::PlaySound, "pin/accepted.wav", "123#").unwrap();
        menu.bind_action(ActionKind::Terminate, "", "9").unwrap();

        let call = ScriptedCall::new("call-6");
        call.digits.send_all("123#9").unwrap();

        let outcome = execute(&catalog, "pin", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert!(call
            .channel
            .played()
            .contains(&"pin/accepted.wav".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_while_waiting_for_digits() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-7");
        let token = call.context.cancellation_token();

        let (outcome, _) = tokio::join!(execute(&catalog, "main", call.context), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        assert_eq!(outcome.unwrap(), MenuOutcome::ChannelGone);
        assert_eq!(call.channel.played(), vec!["main/greeting.wav"]);
        assert!(call.control.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_during_prompt() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-8");
        call.channel.hang_up_on("sales/greeting.wav");
        call.digits.send('1').unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::ChannelGone);
        assert_eq!(
            call.channel.played(),
            vec!["main/greeting.wav", "sales/greeting.wav"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_gone_ends_call() {
        let catalog = catalog();
        let ScriptedCall { context, digits, .. } = ScriptedCall::new("call-9");
        drop(digits);

        let outcome = execute(&catalog, "main", context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::ChannelGone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_prompt_digits_are_used() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-10");
        call.channel.interrupt("main/greeting.wav", "1");
        call.channel.interrupt("sales/greeting.wav", "9");
        call.channel.interrupt("main/short.wav", "9");

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec![
                "main/greeting.wav",
                "sales/greeting.wav",
                "sales/bye.wav",
                "main/short.wav",
                "main/bye.wav",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_ahead_survives_invalid_entry() {
        let catalog = catalog();
        let (call, mut rx) = call_with_events("call-10b");
        call.channel.interrupt("main/greeting.wav", "49");

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec!["main/greeting.wav", "main/invalid.wav", "main/short.wav", "main/bye.wav"]
        );
        assert_eq!(
            dispatched(&drain(&mut rx)),
            vec![(ActionKind::Terminate, Some("9".to_string()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_ahead_carries_into_submenu() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-10c");
        call.channel.interrupt("main/greeting.wav", "19");
        call.channel.interrupt("main/short.wav", "9");

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.channel.played(),
            vec![
                "main/greeting.wav",
                "sales/greeting.wav",
                "sales/bye.wav",
                "main/short.wav",
                "main/bye.wav",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_ends_flow() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-11");
        call.digits.send('0').unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(
            outcome,
            MenuOutcome::Transferred {
                extension: "1000".to_string(),
                dialplan: "XML".to_string(),
                context: "default".to_string(),
            }
        );
        assert_eq!(call.channel.played(), vec!["main/greeting.wav"]);
        assert_eq!(call.control.ops().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_transfer_reprompts() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-12");
        call.control.reject_transfers();
        call.digits.send_all("09").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_and_speech() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-13");
        call.control.fail_application("voicemail");
        call.digits.send_all("579").unwrap();

        let outcome = execute(&catalog, "main", call.context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(
            call.control.ops(),
            vec![ChannelOp::Application {
                name: "voicemail".to_string(),
                args: "check 100".to_string(),
            }]
        );
        assert!(call.channel.ops().contains(&ChannelOp::Spoke {
            engine: Some("flite".to_string()),
            voice: Some("kal".to_string()),
            text: "Open nine to five".to_string(),
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_submenu_and_depth_limit() {
        let catalog = catalog();
        let (call, mut rx) = call_with_events("call-14");
        call.digits.send_all("319").unwrap();
        let context = call.context.with_max_depth(1);

        let outcome = execute(&catalog, "main", context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);
        assert_eq!(entered(&drain(&mut rx)), vec!["main"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_see_user_data() {
        let catalog = catalog();
        let route = catalog.callbacks().register(
            "route",
            |ctx: &CallbackContext<'_>, buffer: &mut String| -> Result<ActionKind> {
                let vip = ctx
                    .user_data
                    .and_then(|data| data.downcast_ref::<String>())
                    .map_or(false, |tier| tier == "vip");
                if vip {
                    buffer.clear();
                    buffer.push_str("sales");
                    Ok(ActionKind::SubMenu)
                } else {
                    Ok(ActionKind::Noop)
                }
            },
        );
        let broken = catalog.callbacks().register(
            "broken",
            |_: &CallbackContext<'_>, _: &mut String| -> Result<ActionKind> {
                Err(Error::internal("lookup failed"))
            },
        );
        let main = catalog.get("main").unwrap();
        main.bind_callback(route, "", "2").unwrap();
        main.bind_callback(broken, "", "4").unwrap();

        let (call, mut rx) = call_with_events("call-15");
        call.digits.send_all("4299").unwrap();
        let context = call.context.with_user_data(Arc::new("vip".to_string()));

        let outcome = execute(&catalog, "main", context).await.unwrap();
        assert_eq!(outcome, MenuOutcome::Completed);

        let events = drain(&mut rx);
        assert_eq!(entered(&events), vec!["main", "sales"]);
        assert_eq!(dispatched(&events)[0], (ActionKind::Noop, Some("4".to_string())));
        assert!(events
            .iter()
            .any(|event| matches!(event, IvrEvent::Error { message, .. } if message.contains("broken"))));
    }

    #[tokio::test]
    async fn test_unknown_entry_menu() {
        let catalog = catalog();
        let call = ScriptedCall::new("call-16");
        let result = execute(&catalog, "missing", call.context).await;
        assert!(matches!(result, Err(Error::MenuNotFound(_))));
    }
}
