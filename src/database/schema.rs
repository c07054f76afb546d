// Database schema definitions and migrations
// This module contains the SQL schema for the cert-ledger database

pub const ACTION_REQUESTS_SCHEMA: &str = include_str!("../../migrations/001_action_requests.sql");
pub const VERIFICATION_SCHEMA: &str = include_str!("../../migrations/002_verification.sql");

pub const MIGRATIONS: [(&str, &str); 2] = [
    ("001_action_requests", ACTION_REQUESTS_SCHEMA),
    ("002_verification", VERIFICATION_SCHEMA),
];
