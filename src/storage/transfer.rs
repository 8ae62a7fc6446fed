//! Copy finished data files to the analysis machine.

use std::path::Path;
use tokio::process::Command;

/// Copy `data_file` to `remote` (an rsync destination such as
/// `tomo@mona3:/local/data/`).
///
/// Returns whether the copy succeeded. Failures are logged and never abort the
/// campaign: the data is safe on the detector machine either way.
pub async fn transfer(data_file: &Path, remote: &str) -> bool {
    transfer_with(Path::new("rsync"), data_file, remote).await
}

pub(crate) async fn transfer_with(program: &Path, data_file: &Path, remote: &str) -> bool {
    tracing::info!(file = %data_file.display(), remote, "transferring data file");
    let result = Command::new(program)
        .arg("-a")
        .arg(data_file)
        .arg(remote)
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            tracing::info!(file = %data_file.display(), remote, "transfer complete");
            true
        }
        Ok(output) => {
            tracing::error!(
                file = %data_file.display(),
                remote,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "transfer failed"
            );
            false
        }
        Err(err) => {
            tracing::error!(
                program = %program.display(),
                error = %err,
                "could not start transfer"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_logged_not_fatal() {
        let ok = transfer_with(
            Path::new("/nonexistent/bin/rsync"),
            Path::new("/tmp/sample_000.h5"),
            "tomo@mona3:/local/data/",
        )
        .await;
        assert!(!ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copies_with_local_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("sample_000.h5");
        std::fs::write(&src, b"data").unwrap();
        let dest = dir.path().join("remote");
        std::fs::create_dir_all(&dest).unwrap();

        // `cp -a` takes the same arguments as rsync for a local copy.
        let ok = transfer_with(Path::new("cp"), &src, &dest.display().to_string()).await;
        assert!(ok);
        assert!(dest.join("sample_000.h5").exists());
    }
}
