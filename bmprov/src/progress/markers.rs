use std::path::{Path, PathBuf};
use anyhow::Context;
use async_trait::async_trait;
use crate::progress::{ClusterProgressSource, PollOutcome};

/// progress set once the installer starts preparing the servers
pub const PREPARING_PROGRESS: u8 = 3;
const ERROR_WORDS: [&str; 4] = ["Error", "ERROR", "error", "not found"];

/// Percentage of finished puppet runs in a manifests directory, `.log` files are finished and `.pp`
/// files are the total
pub async fn marker_progress(manifests: &Path) -> anyhow::Result<u8> {
    let mut entries = tokio::fs::read_dir(manifests).await
        .context(format!("reading manifests dir {manifests:?}"))?;
    let (mut logs, mut pps) = (0u32, 0u32);
    while let Some(entry) = entries.next_entry().await? {
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("log") => logs += 1,
            Some("pp") => pps += 1,
            _ => {}
        }
    }
    if pps == 0 {
        return Ok(0);
    }
    let progress = (100.0 * logs as f64 / pps as f64).round() as u32;
    Ok(progress.min(100) as u8)
}

/// The installer writes its working directory into the location file, manifests live below it
pub async fn read_manifests_dir(location_file: &Path) -> anyhow::Result<Option<PathBuf>> {
    if !location_file.is_file() {
        return Ok(None);
    }
    let text = tokio::fs::read_to_string(location_file).await
        .context(format!("reading {location_file:?}"))?;
    let Some(first) = text.lines().next().map(|l| l.trim()).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    Ok(Some(PathBuf::from(first).join("manifests")))
}

/// What was learned from the lines appended to the install log since the last scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    pub progress: Option<u8>,
    pub error: Option<String>,
}

/// Reads the installer log incrementally, remembering how many lines it has already seen
#[derive(Debug, Clone)]
pub struct InstallLogScanner {
    path: PathBuf,
    lines_seen: usize,
}

impl InstallLogScanner {
    pub fn new(path: PathBuf) -> Self {
        Self { path, lines_seen: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn scan(&mut self) -> anyhow::Result<LogScan> {
        let mut scan = LogScan::default();
        if !self.path.is_file() {
            return Ok(scan);
        }
        let text = tokio::fs::read_to_string(&self.path).await
            .context(format!("reading install log {:?}", self.path))?;
        for (index, line) in text.lines().enumerate().skip(self.lines_seen) {
            self.lines_seen = index + 1;
            if line.contains("Preparing servers") {
                scan.progress = Some(PREPARING_PROGRESS);
            }
            if line.contains("successfully") {
                scan.progress = Some(100);
            }
            if ERROR_WORDS.iter().any(|w| line.contains(w)) {
                scan.error = Some(format!(
                    "install error, see line {} in '{}'", self.lines_seen, self.path.display()
                ));
                break;
            }
        }
        Ok(scan)
    }
}

/// Progress of the cluster software installer from its log and its manifest markers
pub struct MarkerProgressSource {
    location_file: PathBuf,
    manifests: Option<PathBuf>,
    log: InstallLogScanner,
    current: u8,
    message: String,
}

impl MarkerProgressSource {
    pub fn new(location_file: PathBuf, log_file: PathBuf) -> Self {
        Self {
            location_file,
            manifests: None,
            log: InstallLogScanner::new(log_file),
            current: 0,
            message: String::new(),
        }
    }

    async fn advance(&mut self) -> anyhow::Result<Option<String>> {
        let scan = self.log.scan().await?;
        if let Some(error) = scan.error {
            return Ok(Some(error));
        }
        if let Some(progress) = scan.progress {
            self.raise(progress, "installer log");
        }
        if self.current == 100 {
            return Ok(None);
        }
        if self.manifests.is_none() {
            self.manifests = read_manifests_dir(&self.location_file).await?;
        }
        if let Some(manifests) = self.manifests.as_ref().filter(|m| m.is_dir()) {
            let progress = marker_progress(manifests).await?;
            if progress >= PREPARING_PROGRESS {
                self.raise(progress, "manifests applied");
            }
        }
        Ok(None)
    }

    fn raise(&mut self, progress: u8, message: &str) {
        if progress > self.current {
            self.current = progress;
            self.message = message.to_string();
        }
    }
}

#[async_trait]
impl ClusterProgressSource for MarkerProgressSource {
    async fn poll(&mut self) -> PollOutcome {
        match self.advance().await {
            Ok(None) => PollOutcome::progress(self.current, &self.message),
            Ok(Some(error)) => PollOutcome::failed(&error),
            Err(err) => PollOutcome::failed(&format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            tokio::fs::write(dir.join(name), "").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_marker_progress() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(marker_progress(dir.path()).await.unwrap(), 0);
        touch(dir.path(), &["a.pp", "b.pp", "c.pp", "a.log", "other.txt"]).await;
        assert_eq!(marker_progress(dir.path()).await.unwrap(), 33);
        touch(dir.path(), &["b.log"]).await;
        assert_eq!(marker_progress(dir.path()).await.unwrap(), 67);
        assert!(marker_progress(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_log_scanner_only_reads_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("install.log");
        let mut scanner = InstallLogScanner::new(log.clone());
        assert_eq!(scanner.scan().await.unwrap(), LogScan::default());

        tokio::fs::write(&log, "unpacking\nPreparing servers\n").await.unwrap();
        assert_eq!(scanner.scan().await.unwrap().progress, Some(3));
        assert_eq!(scanner.scan().await.unwrap(), LogScan::default());

        tokio::fs::write(&log, "unpacking\nPreparing servers\napplying\npackage foo not found\n").await.unwrap();
        let scan = scanner.scan().await.unwrap();
        assert_eq!(scan.error, Some(format!("install error, see line 4 in '{}'", log.display())));
    }

    #[tokio::test]
    async fn test_marker_source() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("cluster-1");
        let log = dir.path().join("install.log");
        let mut source = MarkerProgressSource::new(location.clone(), log.clone());
        assert_eq!(source.poll().await, PollOutcome::progress(0, ""));

        let work = dir.path().join("work");
        tokio::fs::create_dir_all(work.join("manifests")).await.unwrap();
        tokio::fs::write(&location, format!("{}\n", work.display())).await.unwrap();
        touch(&work.join("manifests"), &["a.pp", "b.pp", "c.pp", "d.pp"]).await;
        tokio::fs::write(&log, "Preparing servers\n").await.unwrap();
        assert_eq!(source.poll().await, PollOutcome::progress(3, "installer log"));

        touch(&work.join("manifests"), &["a.log", "b.log"]).await;
        assert_eq!(source.poll().await, PollOutcome::progress(50, "manifests applied"));

        tokio::fs::write(&log, "Preparing servers\nInstallation completed successfully\n").await.unwrap();
        assert_eq!(source.poll().await, PollOutcome::progress(100, "installer log"));
    }
}
