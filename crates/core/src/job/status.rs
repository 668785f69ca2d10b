#![forbid(unsafe_code)]

/// Lifecycle position of a job. Ordering follows the only direction a job may move in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    AwaitingPayment,
    AwaitingInput,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::AwaitingPayment,
        JobStatus::AwaitingInput,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::AwaitingInput => "awaiting_input",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::AwaitingPayment => 0,
            Self::AwaitingInput => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// `completed` is reachable only from `running`; `failed` from any live state (computation
    /// errors and expired deadlines); `awaiting_payment` may skip `awaiting_input` when the job
    /// needs no additional input.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        match next {
            Self::AwaitingPayment => false,
            Self::AwaitingInput => self == Self::AwaitingPayment,
            Self::Running => true,
            Self::Completed => self == Self::Running,
            Self::Failed => true,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
