//! Three-block pass outcome message.

/// Suffix added to job names of dry-run passes.
pub const DRY_RUN_SUFFIX: &str = "-dryrun";

/// Outcome of one pass, as free text in three blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    /// Job name, with [`DRY_RUN_SUFFIX`] for dry runs.
    pub job_name: String,
    /// Emoji name without colons.
    pub icon: String,
    pub failed: String,
    pub completed: String,
    pub warned: String,
    /// Whether the warned block is delivered at all.
    pub send_warnings: bool,
}

impl Notification {
    pub fn new(job: &str, icon: &str, dry_run: bool) -> Self {
        let job_name = if dry_run {
            format!("{job}{DRY_RUN_SUFFIX}")
        } else {
            job.to_string()
        };
        Self {
            job_name,
            icon: icon.to_string(),
            ..Self::default()
        }
    }

    pub fn with_failed(mut self, text: impl Into<String>) -> Self {
        self.failed = text.into();
        self
    }

    pub fn with_completed(mut self, text: impl Into<String>) -> Self {
        self.completed = text.into();
        self
    }

    pub fn with_warned(mut self, text: impl Into<String>) -> Self {
        self.warned = text.into();
        self
    }

    pub fn with_send_warnings(mut self, send: bool) -> Self {
        self.send_warnings = send;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.job_name.ends_with(DRY_RUN_SUFFIX)
    }

    /// Warned text, if warnings are delivered and there are any.
    pub fn included_warnings(&self) -> Option<&str> {
        (self.send_warnings && !self.warned.is_empty()).then_some(self.warned.as_str())
    }

    /// Nothing would be delivered.
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.completed.is_empty() && self.included_warnings().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_suffix() {
        assert_eq!(Notification::new("hpcid-slurm", "slurm", true).job_name, "hpcid-slurm-dryrun");
        assert_eq!(Notification::new("hpcid-slurm", "slurm", false).job_name, "hpcid-slurm");
        assert!(Notification::new("hpcid-slurm", "slurm", true).is_dry_run());
    }

    #[test]
    fn test_warnings_only_count_when_sent() {
        let n = Notification::new("job", "icon", false).with_warned("No group members in p1");
        assert!(n.is_empty());
        assert!(!n.clone().with_send_warnings(true).is_empty());
        assert!(!n.with_failed("x").is_empty());
    }
}
