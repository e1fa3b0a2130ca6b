mod common;

#[cfg(test)]
mod tests {
    use super::common::StreamBuilder;
    use assert_cmd::Command;
    use predicates::prelude::*;

    fn segmenter() -> Command {
        Command::cargo_bin("ts-segmenter").unwrap()
    }

    #[test]
    fn test_manual_pids_without_tables_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        segmenter()
            .args(["--apids", "false", "--vpid", "256", "--init-type", "0"])
            .arg("--dst-path")
            .arg(dir.path().join("out"))
            .write_stdin(Vec::new())
            .assert()
            .failure()
            .stderr(predicate::str::contains("configuration"));
        // nothing was read or written
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_unknown_selector_is_rejected() {
        segmenter()
            .args(["--manifest-type", "7", "--media-destination-type", "0"])
            .args(["--manifest-destination-type", "0"])
            .write_stdin(Vec::new())
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown manifest type 7"));
    }

    #[test]
    fn test_stdin_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("segmenter.log");
        segmenter()
            .args(["--target-dur", "2", "--manifest-type", "1"])
            .arg("--dst-path")
            .arg(dir.path())
            .arg("--logs-path")
            .arg(&logs)
            .write_stdin(StreamBuilder::new().seconds(5))
            .assert()
            .success();

        let manifest = std::fs::read_to_string(dir.path().join("chunklist.m3u8")).unwrap();
        assert!(manifest.starts_with("#EXTM3U\n"));
        assert!(manifest.contains("#EXT-X-PLAYLIST-TYPE:EVENT\n"));
        assert!(manifest.contains("chunk_00002.ts\n"));
        assert!(manifest.ends_with("#EXT-X-ENDLIST\n"));
        for seq in 0..3 {
            assert!(dir.path().join(format!("chunk_{:05}.ts", seq)).exists());
        }

        let log = std::fs::read_to_string(logs).unwrap();
        assert!(log.lines().all(|line| line.starts_with('{')));
        assert!(log.contains("input finished"));
    }

    #[test]
    fn test_custom_names_and_init_segment() {
        let dir = tempfile::tempdir().unwrap();
        segmenter()
            .args(["--chunks-base-filename", "seg-", "--chunklist-filename", "live.m3u8"])
            .args(["--init-type", "1", "--manifest-type", "0", "--target-dur", "1"])
            .arg("--dst-path")
            .arg(dir.path())
            .write_stdin(StreamBuilder::new().seconds(2))
            .assert()
            .success();

        let manifest = std::fs::read_to_string(dir.path().join("live.m3u8")).unwrap();
        assert!(manifest.contains("#EXT-X-VERSION:6\n"));
        assert!(manifest.contains("#EXT-X-MAP:URI=\"seg-init.ts\"\n"));
        assert!(manifest.contains("seg-00000.ts\n"));
        assert!(dir.path().join("seg-init.ts").exists());
    }
}
