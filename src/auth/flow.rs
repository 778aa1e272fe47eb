//! Login and enrollment state machines.
//!
//! Flow Overview:
//! 1) A credential check either grants a session directly or parks the
//!    attempt as a pending login awaiting push approval.
//! 2) The challenge step sends one push request to the provider and the
//!    client polls for its outcome.
//! 3) Enrollment issues a signed token, renders it as a QR artifact, and
//!    polls the provider until the device scan completes.
//!
//! The transitions are pure functions; HTTP handlers and the correlation
//! store drive them and apply the side effects (session grant, user record
//! update) exactly once.

/// Client-visible states of a login attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginState {
    Anonymous,
    AwaitingPush,
    Authenticated,
    /// Terminal failure. Recoverable only by starting over from `Anonymous`.
    Failed,
}

/// Events driving a login attempt forward.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoginEvent {
    ValidCredentials { second_factor: bool },
    InvalidCredentials,
    PushPending,
    PushApproved,
    PushRejected,
}

/// Advance a login attempt by one event.
///
/// Events arriving in a state they do not apply to leave the state
/// unchanged; the handlers treat those as protocol misuse before ever
/// reaching this function.
#[must_use]
pub fn advance_login(state: LoginState, event: &LoginEvent) -> LoginState {
    match (state, event) {
        (LoginState::Anonymous, LoginEvent::ValidCredentials { second_factor }) => {
            if *second_factor {
                LoginState::AwaitingPush
            } else {
                LoginState::Authenticated
            }
        }
        (LoginState::Anonymous, LoginEvent::InvalidCredentials) => LoginState::Anonymous,
        (LoginState::AwaitingPush, LoginEvent::PushPending) => LoginState::AwaitingPush,
        (LoginState::AwaitingPush, LoginEvent::PushApproved) => LoginState::Authenticated,
        (LoginState::AwaitingPush, LoginEvent::PushRejected) => LoginState::Failed,
        (state, _) => state,
    }
}

/// States of the second-factor enrollment flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnrollmentState {
    NotEnrolled,
    TokenIssued,
    Completed,
    Enrolled,
}

/// Events driving an enrollment forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnrollmentEvent {
    TokenIssued,
    ScanPending,
    ScanCompleted,
    Disabled,
}

/// Advance the enrollment flow by one event.
#[must_use]
pub fn advance_enrollment(state: EnrollmentState, event: EnrollmentEvent) -> EnrollmentState {
    match (state, event) {
        (EnrollmentState::NotEnrolled, EnrollmentEvent::TokenIssued) => EnrollmentState::TokenIssued,
        (EnrollmentState::TokenIssued, EnrollmentEvent::ScanPending) => EnrollmentState::TokenIssued,
        (EnrollmentState::TokenIssued, EnrollmentEvent::ScanCompleted) => {
            EnrollmentState::Completed
        }
        (EnrollmentState::Completed | EnrollmentState::Enrolled, EnrollmentEvent::Disabled) => {
            EnrollmentState::NotEnrolled
        }
        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_path_without_second_factor() {
        let state = advance_login(
            LoginState::Anonymous,
            &LoginEvent::ValidCredentials {
                second_factor: false,
            },
        );
        assert_eq!(state, LoginState::Authenticated);
    }

    #[test]
    fn second_factor_path_awaits_push() {
        let state = advance_login(
            LoginState::Anonymous,
            &LoginEvent::ValidCredentials {
                second_factor: true,
            },
        );
        assert_eq!(state, LoginState::AwaitingPush);
    }

    #[test]
    fn invalid_credentials_stay_anonymous() {
        let state = advance_login(LoginState::Anonymous, &LoginEvent::InvalidCredentials);
        assert_eq!(state, LoginState::Anonymous);
    }

    #[test]
    fn pending_polls_leave_state_unchanged() {
        let mut state = LoginState::AwaitingPush;
        for _ in 0..3 {
            state = advance_login(state, &LoginEvent::PushPending);
            assert_eq!(state, LoginState::AwaitingPush);
        }
        state = advance_login(state, &LoginEvent::PushApproved);
        assert_eq!(state, LoginState::Authenticated);
    }

    #[test]
    fn rejection_is_terminal() {
        let state = advance_login(LoginState::AwaitingPush, &LoginEvent::PushRejected);
        assert_eq!(state, LoginState::Failed);

        // No event moves a failed attempt forward; the client restarts.
        let state = advance_login(state, &LoginEvent::PushApproved);
        assert_eq!(state, LoginState::Failed);
    }

    #[test]
    fn authenticated_is_terminal() {
        let state = advance_login(LoginState::Authenticated, &LoginEvent::PushRejected);
        assert_eq!(state, LoginState::Authenticated);
    }

    #[test]
    fn enrollment_happy_path() {
        let state = advance_enrollment(EnrollmentState::NotEnrolled, EnrollmentEvent::TokenIssued);
        assert_eq!(state, EnrollmentState::TokenIssued);

        let state = advance_enrollment(state, EnrollmentEvent::ScanPending);
        assert_eq!(state, EnrollmentState::TokenIssued);

        let state = advance_enrollment(state, EnrollmentEvent::ScanCompleted);
        assert_eq!(state, EnrollmentState::Completed);
    }

    #[test]
    fn disable_returns_to_not_enrolled() {
        let state = advance_enrollment(EnrollmentState::Enrolled, EnrollmentEvent::Disabled);
        assert_eq!(state, EnrollmentState::NotEnrolled);
    }
}
