//! Job row model: status vocabulary, null-safe projection, terminal updates.

use crate::error::DatabaseError;

/// Status values shared with the job producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Waiting to be claimed. The only claimable status.
    Wait,
    /// Claimed by a worker.
    InProgress,
    /// Finished and published.
    Done,
    /// Finished with a recorded error.
    Error,
}

impl JobStatus {
    /// Token stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parse a stored token. Unknown tokens yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wait" => Some(Self::Wait),
            "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Transitions a worker may perform. Nothing ever returns to `wait`.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Wait, InProgress) | (InProgress, Done) | (InProgress, Error)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns in the order every backend selects them.
pub const JOB_COLUMNS: &str = "id, error, errordescription, command, status, complete, task, priority, resulturl, resultsurl, duration, outobjects";

/// A job row as stored, with every nullable column kept as `Option`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRow {
    pub id: u64,
    pub error: Option<i64>,
    pub errordescription: Option<String>,
    pub command: Option<String>,
    pub status: Option<String>,
    pub complete: Option<i64>,
    pub task: Option<String>,
    pub priority: Option<String>,
    pub resulturl: Option<String>,
    pub resultsurl: Option<String>,
    pub duration: Option<f64>,
    pub outobjects: Option<String>,
}

impl JobRow {
    /// Project the row onto zero-value defaults.
    pub fn into_snapshot(self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            error: self.error.unwrap_or(0),
            errordescription: self.errordescription.unwrap_or_default(),
            command: self.command.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            complete: self.complete.unwrap_or(0),
            task: self.task.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            resulturl: self.resulturl.unwrap_or_default(),
            resultsurl: self.resultsurl.unwrap_or_default(),
            duration: self.duration.unwrap_or(0.0),
            outobjects: self.outobjects.unwrap_or_default(),
        }
    }
}

/// Null-safe view of a job: absent text is `""`, absent numbers are zero.
///
/// `JobSnapshot::default()` is the projection of "no row".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSnapshot {
    pub id: u64,
    pub error: i64,
    pub errordescription: String,
    pub command: String,
    pub status: String,
    pub complete: i64,
    pub task: String,
    pub priority: String,
    pub resulturl: String,
    pub resultsurl: String,
    pub duration: f64,
    pub outobjects: String,
}

impl JobSnapshot {
    /// Parsed status, if it is one of the known tokens.
    pub fn state(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// The shell text to run: `command`, falling back to `task`.
    pub fn run_text(&self) -> Option<&str> {
        [self.command.trim(), self.task.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
    }
}

/// Terminal write for a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub complete: i64,
    pub duration: f64,
    pub resulturl: Option<String>,
    pub resultsurl: Option<String>,
    pub outobjects: Option<String>,
    pub error: Option<i64>,
    pub errordescription: Option<String>,
}

impl JobUpdate {
    /// Successful completion. `links` and `objects` are parallel lists.
    pub fn done(duration: f64, links: &[String], objects: &[String]) -> Self {
        Self {
            status: JobStatus::Done,
            complete: 1,
            duration,
            resulturl: Some(links.first().cloned().unwrap_or_default()),
            resultsurl: Some(serde_json::to_string(links).unwrap_or_else(|_| "[]".into())),
            outobjects: Some(serde_json::to_string(objects).unwrap_or_else(|_| "[]".into())),
            error: None,
            errordescription: None,
        }
    }

    /// Reject a write that is not a legal move out of `in-progress`.
    pub fn ensure_legal(&self) -> Result<(), DatabaseError> {
        if JobStatus::InProgress.can_transition_to(self.status) {
            Ok(())
        } else {
            Err(DatabaseError::Query(format!(
                "illegal status transition in-progress -> {}",
                self.status
            )))
        }
    }

    /// Failure with a stable error code and description.
    pub fn failed(duration: f64, code: i64, description: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            complete: 0,
            duration,
            resulturl: None,
            resultsurl: None,
            outobjects: None,
            error: Some(code),
            errordescription: Some(description.into()),
        }
    }
}

/// A job inserted by a producer. Anything left `None` is stored as NULL.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub status: Option<String>,
    pub command: Option<String>,
    pub task: Option<String>,
    pub priority: Option<String>,
}

impl NewJob {
    /// A `wait` job running the given shell command.
    pub fn waiting(command: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Wait.as_str().to_string()),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// A job with the given raw status and nothing else.
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_round_trip() {
        for status in [
            JobStatus::Wait,
            JobStatus::InProgress,
            JobStatus::Done,
            JobStatus::Error,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
        assert_eq!(JobStatus::InProgress.to_string(), "in-progress");
    }

    #[test]
    fn no_transition_back_to_wait() {
        assert!(JobStatus::Wait.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Done));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Error));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Wait));
        assert!(!JobStatus::Error.can_transition_to(JobStatus::Wait));
        assert!(!JobStatus::Wait.can_transition_to(JobStatus::Done));
    }

    #[test]
    fn only_terminal_updates_are_legal() {
        assert!(JobUpdate::done(1.0, &[], &[]).ensure_legal().is_ok());
        assert!(JobUpdate::failed(1.0, 3, "upload").ensure_legal().is_ok());

        let mut rewind = JobUpdate::failed(1.0, 5, "x");
        rewind.status = JobStatus::Wait;
        assert!(matches!(rewind.ensure_legal(), Err(DatabaseError::Query(_))));
    }

    #[test]
    fn all_absent_row_projects_to_defaults() {
        let snapshot = JobRow {
            id: 9,
            ..Default::default()
        }
        .into_snapshot();

        assert_eq!(snapshot.id, 9);
        assert_eq!(snapshot.error, 0);
        assert_eq!(snapshot.complete, 0);
        assert_eq!(snapshot.duration, 0.0);
        assert!(snapshot.command.is_empty());
        assert!(snapshot.status.is_empty());
        assert!(snapshot.outobjects.is_empty());
        assert_eq!(snapshot.state(), None);
    }

    #[test]
    fn run_text_prefers_command_then_task() {
        let mut snapshot = JobSnapshot {
            task: "echo task".into(),
            ..Default::default()
        };
        assert_eq!(snapshot.run_text(), Some("echo task"));

        snapshot.command = "echo command".into();
        assert_eq!(snapshot.run_text(), Some("echo command"));

        assert_eq!(JobSnapshot::default().run_text(), None);
    }

    #[test]
    fn done_update_serializes_links_and_objects() {
        let links = vec!["http://a".to_string(), "http://b".to_string()];
        let objects = vec!["1-a.txt".to_string(), "1-b.txt".to_string()];
        let update = JobUpdate::done(1.5, &links, &objects);

        assert_eq!(update.status, JobStatus::Done);
        assert_eq!(update.complete, 1);
        assert_eq!(update.resulturl.as_deref(), Some("http://a"));
        assert_eq!(
            update.resultsurl.as_deref(),
            Some(r#"["http://a","http://b"]"#)
        );
        assert_eq!(update.outobjects.as_deref(), Some(r#"["1-a.txt","1-b.txt"]"#));
        assert!(update.error.is_none());
    }

    #[test]
    fn failed_update_carries_code() {
        let update = JobUpdate::failed(0.25, 3, "upload failed");
        assert_eq!(update.status, JobStatus::Error);
        assert_eq!(update.complete, 0);
        assert_eq!(update.error, Some(3));
        assert_eq!(update.errordescription.as_deref(), Some("upload failed"));
        assert!(update.resulturl.is_none());
    }
}
