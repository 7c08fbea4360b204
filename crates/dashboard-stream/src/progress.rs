/// Latest status of one model download.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ProgressState {
    pub target_name: String,
    /// Most recent non-empty status line; earlier lines are discarded.
    pub last_line: Option<String>,
    pub active: bool,
}

/// Final outcome read from the last status line of a pull.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullVerdict {
    Succeeded,
    Failed(String),
    Unknown,
}

impl ProgressState {
    /// Percentage from lines shaped like `downloading: 42%`.
    pub fn percent(&self) -> Option<u8> {
        let line = self.last_line.as_deref()?;
        let (_, tail) = line.rsplit_once(':')?;
        let number = tail.trim().strip_suffix('%')?;
        number.trim().parse::<f64>().ok().map(|p| p.clamp(0.0, 100.0).round() as u8)
    }

    /// Interprets the server's terminal lines (`DONE`, `success`, `ERROR: ...`).
    pub fn verdict(&self) -> PullVerdict {
        let Some(line) = self.last_line.as_deref().map(str::trim) else {
            return PullVerdict::Unknown;
        };
        if let Some(message) = line.strip_prefix("ERROR:") {
            return PullVerdict::Failed(message.trim().to_string());
        }
        if line.eq_ignore_ascii_case("done") || line.starts_with("success") {
            return PullVerdict::Succeeded;
        }
        PullVerdict::Unknown
    }
}

/// Consumes coalesced payloads of a line-oriented progress stream.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl ProgressTracker {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            state: ProgressState {
                target_name: target_name.into(),
                last_line: None,
                active: false,
            },
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn into_state(self) -> ProgressState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        self.state.active = true;
    }

    /// Keeps only the last non-empty line of the payload. A payload with no
    /// such line leaves the previous status in place.
    pub fn apply(&mut self, payload: &str) {
        if let Some(line) = last_status_line(payload) {
            self.state.last_line = Some(line.to_string());
        }
    }

    pub(crate) fn fail(&mut self, notice: &str) {
        self.state.last_line = Some(notice.to_string());
        self.state.active = false;
    }

    pub(crate) fn finish(&mut self) {
        self.state.active = false;
    }
}

fn last_status_line(payload: &str) -> Option<&str> {
    payload
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .rfind(|line| !line.is_empty())
}
