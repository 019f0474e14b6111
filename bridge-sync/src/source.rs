//! Update source: where changed users and projects come from.
//!
//! The wire types mirror the external record store's JSON (camelCase). They
//! are converted into the domain types of `bridge-core` at the boundary, which
//! is also where account addresses get lowercased.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use bridge_core::{Address, Project, ProjectId, Relation, User, UserId};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A user as returned by `GET /users`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub id: i64,
    #[serde(default)]
    pub invite_url_hash: String,
    pub account: String,
    #[serde(default)]
    pub validated: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mentorees: Vec<ApiMentoree>,
    #[serde(default)]
    pub mentors: Vec<ApiMentor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMentoree {
    pub user_id: i64,
    #[serde(default)]
    pub custom_name_for_mentor: Option<String>,
    pub account: String,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub mentorship_started: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMentor {
    pub user_id: i64,
    pub account: String,
    #[serde(default)]
    pub mentorship_started: Option<DateTime<Utc>>,
}

/// A project as returned by `GET /projects`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProject {
    pub id: i64,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

impl From<ApiUser> for User {
    fn from(api: ApiUser) -> Self {
        User {
            id: UserId(api.id),
            account: Address::new(api.account),
            invite_url_hash: api.invite_url_hash,
            validated: api.validated,
            updated_at: api.updated_at,
            mentors: api
                .mentors
                .into_iter()
                .map(|m| Relation {
                    user_id: UserId(m.user_id),
                    account: Address::new(m.account),
                })
                .collect(),
            mentorees: api
                .mentorees
                .into_iter()
                .map(|m| Relation {
                    user_id: UserId(m.user_id),
                    account: Address::new(m.account),
                })
                .collect(),
        }
    }
}

impl From<ApiProject> for Project {
    fn from(api: ApiProject) -> Self {
        Project {
            id: ProjectId(api.id),
            name: api.name,
            updated_at: api.updated_at,
            passport_address: Address::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Source contract
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unavailable(String),
}

/// Supplier of records changed since a point in time.
pub trait UpdateSource: Send + Sync {
    fn user_updates(&self, since: DateTime<Utc>) -> Result<Vec<User>, SourceError>;
    fn project_updates(&self, since: DateTime<Utc>) -> Result<Vec<Project>, SourceError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`UpdateSource`] backed by the record store's REST API.
pub struct HttpUpdateSource {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl HttpUpdateSource {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        resource: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<T>, SourceError> {
        let url = format!("{}/{resource}", self.base_url);
        tracing::debug!("GET {url}?since={}", since.timestamp());
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .query("since", &since.timestamp().to_string())
            .call()
            .map_err(|e| SourceError::Http {
                url: url.clone(),
                source: Box::new(e),
            })?;
        response
            .into_json()
            .map_err(|source| SourceError::Decode { url, source })
    }
}

impl UpdateSource for HttpUpdateSource {
    fn user_updates(&self, since: DateTime<Utc>) -> Result<Vec<User>, SourceError> {
        let users: Vec<ApiUser> = self.fetch("users", since)?;
        Ok(users.into_iter().map(User::from).collect())
    }

    fn project_updates(&self, since: DateTime<Utc>) -> Result<Vec<Project>, SourceError> {
        let projects: Vec<ApiProject> = self.fetch("projects", since)?;
        Ok(projects.into_iter().map(Project::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_user_decodes_and_lowercases_accounts() {
        let body = r#"{
            "id": 7,
            "inviteUrlHash": "h7",
            "account": "0xABCDEF",
            "validated": true,
            "joinedAt": "2020-01-01T00:00:00Z",
            "updatedAt": "2020-02-01T00:00:00Z",
            "createdAt": "2020-01-01T00:00:00Z",
            "mentorees": [
                {"userId": 8, "customNameForMentor": "kid", "account": "0xBEEF",
                 "validated": false, "mentorshipStarted": "2020-01-05T00:00:00Z"}
            ],
            "mentors": [{"userId": 1, "account": "0xF00D", "mentorshipStarted": null}]
        }"#;
        let api: ApiUser = serde_json::from_str(body).expect("decode");
        let user = User::from(api);
        assert_eq!(user.id, UserId(7));
        assert_eq!(user.account.as_str(), "0xabcdef");
        assert_eq!(user.mentorees[0].account.as_str(), "0xbeef");
        assert_eq!(user.mentorees[0].user_id, UserId(8));
        assert_eq!(user.mentors[0].account.as_str(), "0xf00d");
    }

    #[test]
    fn api_project_has_no_passport() {
        let api: ApiProject =
            serde_json::from_str(r#"{"id": 3, "name": "X", "updatedAt": "2021-03-01T10:00:00Z"}"#)
                .expect("decode");
        let project = Project::from(api);
        assert_eq!(project.id, ProjectId(3));
        assert!(project.passport_address.is_empty());
    }

    #[test]
    fn http_source_trims_trailing_slash() {
        let source = HttpUpdateSource::new("http://localhost:8080/", "t");
        assert_eq!(source.base_url, "http://localhost:8080");
    }
}
