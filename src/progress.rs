use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Cooperative cancellation. Clones share the flag, so a controller thread
/// keeps one and hands another to the job.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> StopFlag {
        StopFlag::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn should_continue(&self) -> bool {
        !self.is_stopped()
    }
}

/// Progress of the protocol states ("statbar").
#[derive(Clone, Debug, PartialEq)]
pub struct StateEvent {
    pub job: String,
    pub label: &'static str,
    pub delta: f32,
    pub detail: Option<String>,
    pub failed: bool,
    pub stopped: bool,
}

impl StateEvent {
    /// The label as shown to the user, with the failure or stop marker.
    pub fn leading_text(&self) -> String {
        if self.failed {
            format!("{}   FAILED!", self.label)
        } else if self.stopped {
            format!("{}   STOPPED!", self.label)
        } else {
            self.label.to_string()
        }
    }
}

/// Progress of the message transfer ("mailbar").
#[derive(Clone, Debug, PartialEq)]
pub struct MailEvent {
    pub job: String,
    pub current: usize,
    pub total: usize,
    pub delta: f32,
    pub detail: Option<String>,
}

impl MailEvent {
    pub fn leading_text(&self) -> String {
        if self.total > 0 {
            format!("{} of {}", self.current, self.total)
        } else {
            "none".to_string()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    State(StateEvent),
    Mail(MailEvent),
}

/// Receives progress notifications. Fire and forget: a listener that went
/// away must not disturb the job.
pub trait ProgressSink: Send {
    fn notify(&mut self, event: ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn notify(&mut self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Discards everything.
impl ProgressSink for () {
    fn notify(&mut self, _event: ProgressEvent) {}
}

/// Pairs the outbound event channel of a job with its stop flag.
pub struct Reporter {
    job: String,
    sink: Box<dyn ProgressSink>,
    stop: StopFlag,
}

impl Reporter {
    pub fn new(job: &str, sink: Box<dyn ProgressSink>, stop: StopFlag) -> Reporter {
        Reporter {
            job: job.to_string(),
            sink,
            stop,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.sink = sink;
    }

    pub fn set_stop_flag(&mut self, stop: StopFlag) {
        self.stop = stop;
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    pub fn should_continue(&self) -> bool {
        self.stop.should_continue()
    }

    pub fn state(&mut self, label: &'static str, delta: f32, detail: Option<String>) {
        self.state_event(label, delta, detail, false, false);
    }

    pub fn state_failed(&mut self, label: &'static str) {
        self.state_event(label, 0.0, None, true, false);
    }

    pub fn state_stopped(&mut self, label: &'static str) {
        self.state_event(label, 0.0, None, false, true);
    }

    fn state_event(&mut self, label: &'static str, delta: f32, detail: Option<String>, failed: bool, stopped: bool) {
        let event = StateEvent {
            job: self.job.clone(),
            label,
            delta,
            detail,
            failed,
            stopped,
        };
        trace!("{}: {}", self.job, event.leading_text());
        self.sink.notify(ProgressEvent::State(event));
    }

    pub fn mail(&mut self, current: usize, total: usize, delta: f32, detail: Option<String>) {
        self.sink.notify(ProgressEvent::Mail(MailEvent {
            job: self.job.clone(),
            current,
            total,
            delta,
            detail,
        }));
    }
}
