use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

pub fn millis_to_system_time(millis: i64) -> SystemTime {
    let magnitude = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

pub async fn modified_millis(path: &Path) -> io::Result<i64> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(system_time_to_millis(metadata.modified()?))
}

pub async fn set_modified_millis(path: &Path, millis: i64) -> io::Result<()> {
    let path: PathBuf = path.to_path_buf();
    let time = millis_to_system_time(millis);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::options().write(true).open(&path)?;
        file.set_modified(time)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn millis_round_trip_through_system_time() {
        for millis in [0, 1_700_000_123_456, -1_500] {
            assert_eq!(system_time_to_millis(millis_to_system_time(millis)), millis);
        }
    }

    #[tokio::test]
    async fn sets_and_reads_back_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(&path, b"<a/>").unwrap();

        set_modified_millis(&path, 1_700_000_123_456).await.unwrap();

        assert_eq!(modified_millis(&path).await.unwrap(), 1_700_000_123_456);
    }
}
