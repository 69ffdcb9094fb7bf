//! Audit log lines.
//!
//! One pipe-delimited, CRLF-terminated line per transaction stage:
//!
//! ```text
//! timestamp| tid:<id>| event| stage| user| ip| client| protocol| grant type| host| role| status| adapter| description| response ms
//! ```

use crate::sink::LogRecord;
use crate::simulation::identity::TransactionContext;
use crate::simulation::timestamp;
use crate::simulation::transaction::{AuthzFailure, Stage};
use std::fmt;

pub const EVENT_AUTHN_ATTEMPT: &str = "AUTHN_ATTEMPT";
pub const EVENT_OAUTH: &str = "OAuth";

pub const ROLE_IDP: &str = "IdP";
pub const ROLE_AS: &str = "AS";

pub const RS_CLIENT: &str = "rs_client";
pub const PROTOCOL_OAUTH2: &str = "OAuth20";

pub const GRANT_AUTH_CODE: &str = "authorization_code";
pub const GRANT_VALIDATE_BEARER: &str = "urn:pingidentity.com:oauth2:grant_type:validate_bearer";
pub const GRANT_REFRESH: &str = "refresh_token";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_IN_PROGRESS: &str = "inprogress";
pub const STATUS_FAILURE: &str = "failure";

pub const INVALID_CLIENT_ID: &str = "Unknown or invalid client_id";
pub const AUTHZ_CODE_EXPIRED: &str = "invalid_grant: Authorization code is invalid or expired.";
pub const INVALID_SECRET: &str = "invalid_client: Invalid client or client credentials";
pub const INVALID_SCOPE: &str =
    "invalid_scope: The requested scope(s) must be blank or a subset of the provided scopes.";
pub const INVALID_REFRESH_TOKEN: &str = "invalid_grant: unknown, invalid, or expired refresh token";
pub const TOKEN_EXPIRED: &str = "invalid_grant: token expired";

const FIELD_SEPARATOR: &str = "| ";
const FIELD_COUNT: usize = 15;

/// One audit line, borrowing its identity from the running transaction.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub timestamp: String,
    pub tid: &'a str,
    pub event: &'static str,
    pub stage: Stage,
    pub user: &'a str,
    pub ip: String,
    pub client: &'a str,
    pub protocol: &'static str,
    pub grant_type: &'static str,
    pub host: &'a str,
    pub role: &'static str,
    pub status: &'static str,
    pub adapter: &'a str,
    pub description: &'static str,
    pub response_ms: u64,
}

impl<'a> AuditEntry<'a> {
    /// Build the line for `stage`, stamped with the current time.
    pub fn for_stage(
        stage: Stage,
        tx: &'a TransactionContext,
        authz_failure: Option<AuthzFailure>,
        response_ms: u64,
    ) -> Self {
        let mut entry = Self {
            timestamp: timestamp(),
            tid: &tx.transaction_id,
            event: EVENT_OAUTH,
            stage,
            user: &tx.user,
            ip: tx.source_ip.to_string(),
            client: tx.client,
            protocol: PROTOCOL_OAUTH2,
            grant_type: "",
            host: &tx.host,
            role: ROLE_AS,
            status: STATUS_SUCCESS,
            adapter: tx.adapter,
            description: "",
            response_ms,
        };

        match stage {
            Stage::AuthnStart => {
                entry.authn();
                entry.user = "";
                entry.client = tx.client;
                entry.status = STATUS_IN_PROGRESS;
            }
            Stage::AuthnSuccess => entry.authn(),
            Stage::AuthnFailure => {
                entry.authn();
                entry.status = STATUS_FAILURE;
            }
            Stage::AuthzCodeIssued => entry.grant_type = GRANT_AUTH_CODE,
            Stage::AuthzCodeFailure => {
                entry.grant_type = GRANT_AUTH_CODE;
                entry.fail(authz_failure.map_or(INVALID_CLIENT_ID, |f| f.description()));
            }
            Stage::AuthzCodeExpired => {
                entry.grant_type = GRANT_AUTH_CODE;
                entry.fail(AUTHZ_CODE_EXPIRED);
            }
            Stage::TokenIssued => {
                entry.grant_type = GRANT_AUTH_CODE;
                entry.adapter = "";
            }
            Stage::IntrospectionSuccess => entry.resource_server(""),
            Stage::IntrospectionExpired => {
                entry.resource_server("");
                entry.fail(TOKEN_EXPIRED);
            }
            Stage::ValidationSuccess => entry.resource_server(GRANT_VALIDATE_BEARER),
            Stage::ValidationExpired => {
                entry.resource_server(GRANT_VALIDATE_BEARER);
                entry.fail(TOKEN_EXPIRED);
            }
            Stage::RefreshSuccess => {
                entry.grant_type = GRANT_REFRESH;
                entry.adapter = "";
            }
            Stage::RefreshFailure => {
                entry.grant_type = GRANT_REFRESH;
                entry.adapter = "";
                entry.fail(INVALID_REFRESH_TOKEN);
            }
        }
        entry
    }

    pub fn to_record(&self) -> LogRecord {
        LogRecord::new(self.to_string())
    }

    // Authentication happens at the IdP, before any OAuth client is involved.
    fn authn(&mut self) {
        self.event = EVENT_AUTHN_ATTEMPT;
        self.client = "";
        self.protocol = "";
        self.role = ROLE_IDP;
    }

    fn resource_server(&mut self, grant_type: &'static str) {
        self.client = RS_CLIENT;
        self.grant_type = grant_type;
        self.adapter = "";
    }

    fn fail(&mut self, description: &'static str) {
        self.status = STATUS_FAILURE;
        self.description = description;
    }
}

impl fmt::Display for AuditEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}| tid:{}| {}| {}| {}| {}| {}| {}| {}| {}| {}| {}| {}| {}| {}\r\n",
            self.timestamp,
            self.tid,
            self.event,
            self.stage,
            self.user,
            self.ip,
            self.client,
            self.protocol,
            self.grant_type,
            self.host,
            self.role,
            self.status,
            self.adapter,
            self.description,
            self.response_ms,
        )
    }
}

/// An audit line read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAudit {
    pub timestamp: String,
    pub tid: String,
    pub event: String,
    pub stage: Stage,
    pub user: String,
    pub ip: String,
    pub client: String,
    pub protocol: String,
    pub grant_type: String,
    pub host: String,
    pub role: String,
    pub status: String,
    pub adapter: String,
    pub description: String,
    pub response_ms: u64,
}

impl ParsedAudit {
    /// Parse one line, with or without its trailing CRLF.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches("\r\n");
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return None;
        }

        Some(Self {
            timestamp: fields[0].to_string(),
            tid: fields[1].strip_prefix("tid:")?.to_string(),
            event: fields[2].to_string(),
            stage: fields[3].parse().ok()?,
            user: fields[4].to_string(),
            ip: fields[5].to_string(),
            client: fields[6].to_string(),
            protocol: fields[7].to_string(),
            grant_type: fields[8].to_string(),
            host: fields[9].to_string(),
            role: fields[10].to_string(),
            status: fields[11].to_string(),
            adapter: fields[12].to_string(),
            description: fields[13].to_string(),
            response_ms: fields[14].parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tx() -> TransactionContext {
        TransactionContext {
            transaction_id: "AbCdEfGhIjKlMnOpQrStUvWxY-_".to_string(),
            user: "jim.liu@solsys.ca".to_string(),
            source_ip: Ipv4Addr::new(10, 1, 2, 3),
            client: "portal",
            host: "solsyspingfed3".to_string(),
            adapter: "LDAPAuthenticator",
        }
    }

    fn line(stage: Stage, failure: Option<AuthzFailure>) -> ParsedAudit {
        let tx = tx();
        let entry = AuditEntry::for_stage(stage, &tx, failure, 42);
        let text = entry.to_string();
        assert!(text.ends_with("\r\n"));
        ParsedAudit::parse(&text).unwrap()
    }

    #[test]
    fn test_authn_start_line() {
        let parsed = line(Stage::AuthnStart, None);
        assert_eq!(parsed.tid, "AbCdEfGhIjKlMnOpQrStUvWxY-_");
        assert_eq!(parsed.event, EVENT_AUTHN_ATTEMPT);
        assert_eq!(parsed.stage, Stage::AuthnStart);
        assert_eq!(parsed.user, "");
        assert_eq!(parsed.ip, "10.1.2.3");
        assert_eq!(parsed.client, "portal");
        assert_eq!(parsed.protocol, "");
        assert_eq!(parsed.role, ROLE_IDP);
        assert_eq!(parsed.status, STATUS_IN_PROGRESS);
        assert_eq!(parsed.adapter, "LDAPAuthenticator");
        assert_eq!(parsed.response_ms, 42);
    }

    #[test]
    fn test_authn_outcomes_drop_client() {
        let success = line(Stage::AuthnSuccess, None);
        assert_eq!(success.user, "jim.liu@solsys.ca");
        assert_eq!(success.client, "");
        assert_eq!(success.status, STATUS_SUCCESS);

        let failure = line(Stage::AuthnFailure, None);
        assert_eq!(failure.event, EVENT_AUTHN_ATTEMPT);
        assert_eq!(failure.status, STATUS_FAILURE);
    }

    #[test]
    fn test_oauth_stage_fields() {
        let issued = line(Stage::AuthzCodeIssued, None);
        assert_eq!(issued.event, EVENT_OAUTH);
        assert_eq!(issued.role, ROLE_AS);
        assert_eq!(issued.protocol, PROTOCOL_OAUTH2);
        assert_eq!(issued.grant_type, GRANT_AUTH_CODE);
        assert_eq!(issued.adapter, "LDAPAuthenticator");

        let token = line(Stage::TokenIssued, None);
        assert_eq!(token.adapter, "");

        let introspection = line(Stage::IntrospectionSuccess, None);
        assert_eq!(introspection.client, RS_CLIENT);
        assert_eq!(introspection.grant_type, "");

        let validation = line(Stage::ValidationExpired, None);
        assert_eq!(validation.client, RS_CLIENT);
        assert_eq!(validation.grant_type, GRANT_VALIDATE_BEARER);
        assert_eq!(validation.status, STATUS_FAILURE);
        assert_eq!(validation.description, TOKEN_EXPIRED);

        let refresh = line(Stage::RefreshFailure, None);
        assert_eq!(refresh.grant_type, GRANT_REFRESH);
        assert_eq!(refresh.description, INVALID_REFRESH_TOKEN);
    }

    #[test]
    fn test_authz_failure_reason() {
        let parsed = line(Stage::AuthzCodeFailure, Some(AuthzFailure::InvalidScope));
        assert_eq!(parsed.status, STATUS_FAILURE);
        assert_eq!(parsed.description, INVALID_SCOPE);

        let expired = line(Stage::AuthzCodeExpired, None);
        assert_eq!(expired.description, AUTHZ_CODE_EXPIRED);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(ParsedAudit::parse("").is_none());
        assert!(ParsedAudit::parse("a| b| c").is_none());

        let tx = tx();
        let good = AuditEntry::for_stage(Stage::TokenIssued, &tx, None, 7).to_string();
        let bad_stage = good.replace("TokenIssued", "TokenMinted");
        assert!(ParsedAudit::parse(&bad_stage).is_none());
    }
}
