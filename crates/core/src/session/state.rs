use thiserror::Error;

/// Lifecycle of one session.
///
/// ```text
/// Active ──crash──▶ Crashed
///   │                  │
///   └──begin_cleanup───┴──▶ CleaningUp ──finish──▶ Gone
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Active,
	/// Browser disconnected; only cleanup may run.
	Crashed,
	CleaningUp,
	Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
	pub from: SessionState,
	pub to: SessionState,
}

impl SessionState {
	fn transition(&mut self, to: SessionState, allowed: bool) -> Result<(), IllegalTransition> {
		if !allowed {
			return Err(IllegalTransition { from: *self, to });
		}
		*self = to;
		Ok(())
	}

	pub fn crash(&mut self) -> Result<(), IllegalTransition> {
		let allowed = *self == SessionState::Active;
		self.transition(SessionState::Crashed, allowed)
	}

	pub fn begin_cleanup(&mut self) -> Result<(), IllegalTransition> {
		let allowed = matches!(self, SessionState::Active | SessionState::Crashed);
		self.transition(SessionState::CleaningUp, allowed)
	}

	pub fn finish(&mut self) -> Result<(), IllegalTransition> {
		let allowed = *self == SessionState::CleaningUp;
		self.transition(SessionState::Gone, allowed)
	}

	pub fn is_active(&self) -> bool {
		*self == SessionState::Active
	}

	pub fn is_crashed(&self) -> bool {
		*self == SessionState::Crashed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn crash_then_cleanup() {
		let mut state = SessionState::Active;
		state.crash().unwrap();
		assert!(state.is_crashed());
		state.begin_cleanup().unwrap();
		state.finish().unwrap();
		assert_eq!(state, SessionState::Gone);
	}

	#[test]
	fn cleanup_is_entered_once() {
		let mut state = SessionState::Active;
		state.begin_cleanup().unwrap();
		let err = state.begin_cleanup().unwrap_err();
		assert_eq!(err.from, SessionState::CleaningUp);
		assert_eq!(state, SessionState::CleaningUp);
	}

	#[test]
	fn no_crash_after_cleanup_started() {
		let mut state = SessionState::Active;
		state.begin_cleanup().unwrap();
		assert!(state.crash().is_err());
		let mut gone = SessionState::Gone;
		assert!(gone.finish().is_err());
	}
}
