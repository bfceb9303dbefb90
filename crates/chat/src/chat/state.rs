/// Kind of remote exchange that occupies the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Send,
    Reset,
}

/// Lifecycle state of the session's single remote exchange slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending,
    Resetting,
}

/// State transition input for the exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeTransition {
    Begin(ExchangeKind),
    /// The outstanding call resolved, successfully or not.
    Settle,
}

/// Rejection reason for illegal exchange transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeRejection {
    Busy { active: ExchangeState },
    NoActiveExchange,
}

pub type ExchangeTransitionResult = Result<ExchangeState, ExchangeRejection>;

impl ExchangeState {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` may begin an exchange, and only a busy state may settle.
    pub fn apply(self, transition: ExchangeTransition) -> ExchangeTransitionResult {
        match (self, transition) {
            (Self::Idle, ExchangeTransition::Begin(ExchangeKind::Send)) => Ok(Self::Sending),
            (Self::Idle, ExchangeTransition::Begin(ExchangeKind::Reset)) => Ok(Self::Resetting),
            (Self::Sending | Self::Resetting, ExchangeTransition::Begin(_)) => {
                Err(ExchangeRejection::Busy { active: self })
            }
            (Self::Sending | Self::Resetting, ExchangeTransition::Settle) => Ok(Self::Idle),
            (Self::Idle, ExchangeTransition::Settle) => Err(ExchangeRejection::NoActiveExchange),
        }
    }
}

/// Observable status of the outstanding exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingExchange {
    pub in_flight: bool,
    pub last_error: Option<String>,
}
