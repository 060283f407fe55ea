use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};

use super::history::ConversationHistory;
use crate::ai::router;
use crate::ai::{AnalysisResult, ConversationTurn, ModelGateway};
use crate::capture::listener::{CaptureSignal, ListenerExit};
use crate::capture::screen::{encode_png, encode_upload_png};
use crate::capture::store::ScreenshotStore;
use crate::capture::{CaptureError, CaptureEvent, ScreenSource};
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    Analyzing,
    AwaitingQuestion,
    Answering,
}

/// Shared with the listener thread so it can tell when captures are allowed.
pub type LoopStateHandle = Arc<Mutex<LoopState>>;

/// Everything one capture owns; dropped when the user is done with it.
struct CaptureCycle {
    event: CaptureEvent,
    upload_png: Vec<u8>,
    analysis: AnalysisResult,
    history: ConversationHistory,
}

/// Drives capture → analysis → questions over a line-based console.
pub struct Conversation<R, W> {
    gateway: Arc<dyn ModelGateway>,
    screen: Box<dyn ScreenSource>,
    store: ScreenshotStore,
    upload_max_width: u32,
    max_turns: usize,
    state: LoopStateHandle,
    input: R,
    output: W,
}

impl<R, W> Conversation<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        screen: Box<dyn ScreenSource>,
        config: &AppConfig,
        state: LoopStateHandle,
        input: R,
        output: W,
    ) -> Self {
        Self {
            gateway,
            screen,
            store: ScreenshotStore::new(config.screenshots_dir.clone()),
            upload_max_width: config.upload_max_width,
            max_turns: config.max_turns,
            state,
            input,
            output,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    fn set_state(&self, next: LoopState) {
        let mut state = self.state.lock();
        if *state != next {
            log::debug!("{:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Waits for captures until the listener exits, one cycle at a time.
    pub async fn run(
        &mut self,
        mut signals: mpsc::Receiver<CaptureSignal>,
        mut exit: oneshot::Receiver<ListenerExit>,
    ) -> io::Result<ListenerExit> {
        loop {
            self.set_state(LoopState::Idle);
            writeln!(self.output, "Waiting for trigger event...")?;

            let signal = tokio::select! {
                exit = &mut exit => return Ok(listener_exit(exit)),
                signal = signals.recv() => signal,
            };

            let Some(signal) = signal else {
                return Ok(ListenerExit::Failed("keyboard listener stopped".to_string()));
            };

            // A chord racing the state change may still have queued a second signal.
            self.set_state(LoopState::Capturing);
            while signals.try_recv().is_ok() {}

            tokio::select! {
                exit = &mut exit => return Ok(listener_exit(exit)),
                result = self.run_cycle(signal.fired_at) => result?,
            }
        }
    }

    /// One full cycle for a chord fired at `fired_at`. Model and capture
    /// failures are reported on the console; only console I/O errors escape.
    pub async fn run_cycle(&mut self, fired_at: DateTime<Local>) -> io::Result<()> {
        self.set_state(LoopState::Capturing);
        let (event, upload_png) = match self.capture(fired_at) {
            Ok(captured) => captured,
            Err(e) => {
                log::error!("{}", e);
                writeln!(self.output, "{}", e)?;
                self.set_state(LoopState::Idle);
                return Ok(());
            }
        };
        writeln!(
            self.output,
            "Screenshot taken and saved at {}",
            event.path.display()
        )?;

        self.set_state(LoopState::Analyzing);
        let analysis = match self.gateway.analyze_image(&upload_png, None).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("Analysis of {} failed: {}", event.path.display(), e);
                writeln!(self.output, "Error: {}", e)?;
                self.set_state(LoopState::Idle);
                return Ok(());
            }
        };
        self.print_analysis(&analysis)?;

        let mut cycle = CaptureCycle {
            event,
            upload_png,
            analysis,
            history: ConversationHistory::new(self.max_turns),
        };
        let result = self.converse(&mut cycle).await;
        log::info!(
            "Finished with {} after {} turns",
            cycle.event.path.display(),
            cycle.history.len()
        );
        self.set_state(LoopState::Idle);
        result
    }

    fn capture(&self, fired_at: DateTime<Local>) -> Result<(CaptureEvent, Vec<u8>), CaptureError> {
        let image = self.screen.grab()?;
        let path = self.store.save(&fired_at, &encode_png(&image)?)?;
        let upload_png = encode_upload_png(&image, self.upload_max_width)?;

        Ok((
            CaptureEvent {
                captured_at: fired_at,
                path,
            },
            upload_png,
        ))
    }

    fn print_analysis(&mut self, analysis: &AnalysisResult) -> io::Result<()> {
        writeln!(self.output, "{}", analysis.description)?;
        if !analysis.objects.is_empty() {
            writeln!(self.output, "Objects: {}", analysis.objects.join(", "))?;
        }
        if !analysis.keywords.is_empty() {
            writeln!(self.output, "Keywords: {}", analysis.keywords.join(", "))?;
        }
        Ok(())
    }

    async fn converse(&mut self, cycle: &mut CaptureCycle) -> io::Result<()> {
        loop {
            self.set_state(LoopState::AwaitingQuestion);
            let reply = self
                .prompt("Do you need help with this screenshot? (yes/no) ")
                .await?
                .unwrap_or_default()
                .trim()
                .to_lowercase();

            match reply.as_str() {
                "" | "no" => {
                    writeln!(self.output, "OK. Let me know if you need help later.")?;
                    return Ok(());
                }
                "yes" => {}
                _ => {
                    writeln!(self.output, "Invalid input. Please enter 'yes' or 'no'.")?;
                    continue;
                }
            }

            let Some(question) = self.prompt("Please enter your question: ").await? else {
                return Ok(());
            };
            let question = question.trim().to_string();
            if question.is_empty() {
                writeln!(self.output, "Please type a question.")?;
                continue;
            }

            self.set_state(LoopState::Answering);
            if !self.answer(cycle, &question).await? {
                return Ok(());
            }
        }
    }

    /// Prints the answer to `question`. False when the model call failed and
    /// the cycle should end.
    async fn answer(&mut self, cycle: &mut CaptureCycle, question: &str) -> io::Result<bool> {
        let history = cycle.history.to_vec();
        let result = router::answer(
            self.gateway.as_ref(),
            &cycle.upload_png,
            &mut cycle.analysis,
            &history,
            question,
        )
        .await;

        match result {
            Ok(answer) => {
                log::info!("Answered via {:?}", answer.route);
                cycle.history.push(ConversationTurn::user(question));
                cycle
                    .history
                    .push(ConversationTurn::assistant(answer.text.clone()));
                writeln!(self.output, "{}", answer.text)?;
                Ok(true)
            }
            Err(e) => {
                log::warn!(
                    "Question failed, abandoning {}: {}",
                    cycle.event.path.display(),
                    e
                );
                writeln!(self.output, "Error: {}", e)?;
                Ok(false)
            }
        }
    }

    /// Prints `text` and reads one line. `None` at end of input.
    async fn prompt(&mut self, text: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).await?;
        if read == 0 {
            writeln!(self.output)?;
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

fn listener_exit(received: Result<ListenerExit, oneshot::error::RecvError>) -> ListenerExit {
    received.unwrap_or_else(|_| ListenerExit::Failed("keyboard listener stopped".to_string()))
}
