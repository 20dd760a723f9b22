//! # Platform Constants
//!
//! Exchange, queue and routing-key names shared with the other platform services.
//! These are wire contracts: every service declares the same names.

/// Topic exchanges
pub mod exchanges {
    pub const AUTH_EVENTS: &str = "auth_events";
    pub const USER_EVENTS: &str = "user.events";
    pub const NOTIFICATION_EVENTS: &str = "notification_events";
    pub const TEST_EVENTS: &str = "test.events";
    pub const ASSIGNMENT_EVENTS: &str = "test.assignment.events";
}

/// Durable queues
pub mod queues {
    pub const CANDIDATE_APPROVED: &str = "candidate.approved";
    pub const CANDIDATE_REJECTED: &str = "candidate.rejected";
    pub const TEST_LIST_REQUEST: &str = "test.list.request";
    pub const TEST_LIST_RESPONSE: &str = "test.list.response";
    pub const ASSIGNMENT_COMPLETED: &str = "test.assignment.completed";
    pub const NOTIFICATION_EMAIL: &str = "notification_email_queue";
    pub const TEST_ASSIGNMENT_NOTIFICATION: &str = "test_assignment_notification_queue";
}

/// Routing keys
pub mod routing_keys {
    pub const CANDIDATE_APPROVED: &str = "user.candidate.approved";
    pub const CANDIDATE_REJECTED: &str = "user.candidate.rejected";
    pub const TEST_LIST_REQUEST: &str = "test.list.request";
    pub const TEST_LIST_RESPONSE: &str = "test.list.response";
    pub const ASSIGNMENT_COMPLETED: &str = "test.assignment.completed";
    pub const NOTIFICATION_EMAIL_ALL: &str = "notification.email.*";
    pub const NOTIFICATION_TEST_ASSIGNMENT: &str = "notification.email.test_assignment";
}

/// Named outbound operations, each with its own circuit breaker
pub mod operations {
    pub const VALIDATE_CREDENTIALS: &str = "validate_credentials";
    pub const GET_USER_BY_ID: &str = "get_user_by_id";
    pub const GET_USER_BY_EMAIL: &str = "get_user_by_email";
    pub const INCREMENT_TOKEN_VERSION: &str = "increment_token_version";
}

/// Psychometric test names used by the assignment decision
pub mod test_names {
    pub const LOW_LEVEL: &str = "D-70";
    pub const HIGH_LEVEL: &str = "D-2000";
    pub const LOGIC: &str = "logique_des_propositions";
}

/// Education levels that map to the low-level test
pub const LOW_EDUCATION_LEVELS: &[&str] = &["high_school", "vocational", "some_college"];

/// Education levels that map to the high-level test
pub const HIGH_EDUCATION_LEVELS: &[&str] = &["bachelor", "master", "phd", "doctorate"];

/// Fallback used in notification payloads when eligibility data is missing
pub const NOT_SPECIFIED: &str = "Not specified";
