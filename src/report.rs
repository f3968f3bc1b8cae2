//! End-of-run summary.

use serde::Serialize;

use crate::mirror::MirrorStats;

/// Everything `--report` prints, collected across the run's stages.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub alignment: &'static str,
    pub sources: usize,
    pub mirror: MirrorStats,
    pub staged_files: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub commit: Option<String>,
    pub pushed: bool,
}

impl RunReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("started      {}\n", self.started_at));
        out.push_str(&format!("duration     {} ms\n", self.duration_ms));
        if self.dry_run {
            out.push_str("mode         dry-run\n");
        }
        out.push_str(&format!("alignment    {}\n", self.alignment));
        out.push_str(&format!(
            "mirrored     {} source(s): {} copied, {} deleted, {} bytes\n",
            self.sources,
            self.mirror.files_copied,
            self.mirror.files_deleted,
            self.mirror.bytes_written
        ));
        out.push_str(&format!(
            "staged       {} file(s), +{} -{} line(s)\n",
            self.staged_files, self.insertions, self.deletions
        ));
        match &self.commit {
            Some(oid) => out.push_str(&format!("commit       {oid}\n")),
            None => out.push_str("commit       none\n"),
        }
        out.push_str(&format!(
            "pushed       {}\n",
            if self.pushed { "yes" } else { "no" }
        ));
        out
    }

    pub fn render_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunReport {
        RunReport {
            started_at: "2026-08-07T03:10:00Z".to_string(),
            duration_ms: 412,
            dry_run: false,
            alignment: "up-to-date",
            sources: 2,
            mirror: MirrorStats {
                files_copied: 3,
                files_deleted: 1,
                dirs_created: 0,
                bytes_written: 2048,
            },
            staged_files: 4,
            insertions: 10,
            deletions: 2,
            commit: Some("abc123".to_string()),
            pushed: true,
        }
    }

    #[test]
    fn text_report_mentions_every_stage() {
        let text = sample().render_text();
        assert!(text.contains("alignment    up-to-date"));
        assert!(text.contains("2 source(s)"));
        assert!(text.contains("commit       abc123"));
        assert!(text.contains("pushed       yes"));
        assert!(!text.contains("dry-run"));
    }

    #[test]
    fn no_commit_renders_none() {
        let mut report = sample();
        report.commit = None;
        report.pushed = false;
        report.dry_run = true;
        let text = report.render_text();
        assert!(text.contains("commit       none"));
        assert!(text.contains("pushed       no"));
        assert!(text.contains("mode         dry-run"));
    }

    #[test]
    fn json_report_is_valid() {
        let json = sample().render_json();
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["staged_files"], 4);
        assert_eq!(value["mirror"]["files_copied"], 3);
    }
}
