//! Channel Access through the EPICS base command-line tools.
//!
//! `caget` and `caput` are available on every beamline workstation, so the
//! sequencer drives the IOCs by spawning them rather than linking a CA client
//! library. Reads use `-n` so enum records come back as their index, which keeps
//! [`PvValue::matches`] numeric for state PVs such as `Acquire`. Enum writes go
//! out by choice name and the IOC resolves them. Only long-string waveforms
//! (file names and paths) are transferred with `-S`.

use super::{PvClient, PvFormat, PvTable, PvValue};
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// [`PvClient`] spawning `caget`/`caput`.
pub struct CaToolsClient {
    caget: PathBuf,
    caput: PathBuf,
    /// Channel connect timeout passed to every call (`-w`).
    connect_timeout: Duration,
    formats: HashMap<String, PvFormat>,
}

impl CaToolsClient {
    /// Client for the given tool paths. Every PV is treated as
    /// [`PvFormat::Native`] until [`with_formats`](Self::with_formats) is called.
    pub fn new(caget: PathBuf, caput: PathBuf, connect_timeout: Duration) -> Self {
        Self {
            caget,
            caput,
            connect_timeout,
            formats: HashMap::new(),
        }
    }

    /// Take each PV's wire format from `table`.
    pub fn with_formats(mut self, table: &PvTable) -> Self {
        self.formats = table
            .iter()
            .map(|(pv, name)| (name.to_string(), pv.format()))
            .collect();
        self
    }

    fn format(&self, name: &str) -> PvFormat {
        self.formats.get(name).copied().unwrap_or(PvFormat::Native)
    }

    async fn run(&self, program: &Path, pv: &str, args: &[String]) -> AppResult<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| ScanError::PvTool {
                program: program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ScanError::pv_access(
                pv,
                format!("{} exited with {}: {detail}", program.display(), output.status),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn get_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "-w".to_string(),
            format!("{:.3}", self.connect_timeout.as_secs_f64()),
            "-t".to_string(),
        ];
        match self.format(name) {
            PvFormat::CharArray => args.push("-S".to_string()),
            PvFormat::Native => args.push("-n".to_string()),
            PvFormat::Text => {}
        }
        args.push(name.to_string());
        args
    }

    fn put_args(&self, name: &str, value: &PvValue, completion: Option<Duration>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(timeout) = completion {
            args.push("-c".to_string());
            args.push("-w".to_string());
            args.push(format!("{:.3}", timeout.as_secs_f64()));
        } else {
            args.push("-w".to_string());
            args.push(format!("{:.3}", self.connect_timeout.as_secs_f64()));
        }
        args.push("-t".to_string());
        match value {
            PvValue::FloatArray(values) => {
                args.push("-a".to_string());
                args.push(name.to_string());
                args.push(values.len().to_string());
                args.extend(values.iter().map(|v| v.to_string()));
            }
            PvValue::Str(_) if self.format(name) == PvFormat::CharArray => {
                args.push("-S".to_string());
                args.push(name.to_string());
                args.push(value.to_string());
            }
            scalar => {
                args.push(name.to_string());
                args.push(scalar.to_string());
            }
        }
        args
    }
}

/// Interpret `caget -t -n` output of a numeric, enum or waveform record.
///
/// Waveforms print as `<count> v1 v2 ...`; anything that is not entirely
/// numeric is returned as a string.
pub fn parse_caget(output: &str) -> PvValue {
    let text = output.trim();
    if let Ok(v) = text.parse::<i64>() {
        return PvValue::Int(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return PvValue::Float(v);
    }

    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() > 1 {
        let numbers: Option<Vec<f64>> = tokens.iter().map(|t| t.parse::<f64>().ok()).collect();
        if let Some(numbers) = numbers {
            if let Ok(count) = tokens[0].parse::<usize>() {
                if count == numbers.len() - 1 {
                    return PvValue::FloatArray(numbers[1..].to_vec());
                }
            }
            return PvValue::FloatArray(numbers);
        }
    }

    PvValue::Str(text.to_string())
}

#[async_trait]
impl PvClient for CaToolsClient {
    async fn get(&self, name: &str) -> AppResult<PvValue> {
        let stdout = self.run(&self.caget, name, &self.get_args(name)).await?;
        if self.format(name).is_text() {
            // file names such as 0012 must not round-trip through a number
            return Ok(PvValue::Str(stdout.trim_end_matches(['\n', '\r']).to_string()));
        }
        Ok(parse_caget(&stdout))
    }

    async fn put(&self, name: &str, value: PvValue) -> AppResult<()> {
        let args = self.put_args(name, &value, None);
        self.run(&self.caput, name, &args).await.map(|_| ())
    }

    async fn put_wait(&self, name: &str, value: PvValue, timeout: Duration) -> AppResult<()> {
        let args = self.put_args(name, &value, Some(timeout));
        // caput already bounds the completion wait; the outer timeout covers a hung process.
        let margin = timeout + self.connect_timeout + Duration::from_secs(1);
        match tokio::time::timeout(margin, self.run(&self.caput, name, &args)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(ScanError::PvTimeout {
                pv: name.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Station;
    use crate::pv::Pv;
    use std::collections::BTreeMap;

    fn table() -> PvTable {
        PvTable::new(Station::TwoBmA, "2bmbSP1:", &BTreeMap::new()).unwrap()
    }

    fn client() -> CaToolsClient {
        CaToolsClient::new("caget".into(), "caput".into(), Duration::from_secs(1))
            .with_formats(&table())
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_caget("1\n"), PvValue::Int(1));
        assert_eq!(parse_caget("0.05"), PvValue::Float(0.05));
        assert_eq!(
            parse_caget("Oryx ORX-10G-51S5M\n"),
            PvValue::Str("Oryx ORX-10G-51S5M".into())
        );
    }

    #[test]
    fn test_parse_waveform_drops_count() {
        assert_eq!(
            parse_caget("3 0 0.12 0.24"),
            PvValue::FloatArray(vec![0.0, 0.12, 0.24])
        );
    }

    #[test]
    fn test_parse_path_is_string() {
        assert_eq!(
            parse_caget("/local/data/2020-02/"),
            PvValue::Str("/local/data/2020-02/".into())
        );
    }

    #[test]
    fn test_put_args_with_completion() {
        let args = client().put_args("2bma:m49", &PvValue::Float(10.0), Some(Duration::from_secs(1000)));
        assert_eq!(args, vec!["-c", "-w", "1000.000", "-t", "2bma:m49", "10"]);
    }

    #[test]
    fn test_put_args_file_name_and_array() {
        let t = table();
        let name = t.name(Pv::HdfFileName);
        let args = client().put_args(name, &PvValue::from("sample_001"), None);
        assert_eq!(args, vec!["-w", "1.000", "-t", "-S", name, "sample_001"]);

        let args = client().put_args("p:wave", &PvValue::FloatArray(vec![1.0, 2.5]), None);
        assert_eq!(args, vec!["-w", "1.000", "-t", "-a", "p:wave", "2", "1", "2.5"]);
    }

    #[test]
    fn test_enum_choice_written_by_name() {
        let t = table();
        for (pv, choice) in [
            (Pv::CamTriggerMode, "Overlapped"),
            (Pv::CamImageMode, "Continuous"),
            (Pv::FlyScanControl, "Custom"),
            (Pv::HdfFileWriteMode, "Stream"),
        ] {
            let name = t.name(pv);
            let args = client().put_args(name, &PvValue::from(choice), None);
            assert_eq!(args, vec!["-w", "1.000", "-t", name, choice], "{pv:?}");
        }
    }

    #[test]
    fn test_get_args_follow_format() {
        let t = table();
        let c = client();
        assert_eq!(
            c.get_args(t.name(Pv::HdfFilePath)),
            vec!["-w", "1.000", "-t", "-S", t.name(Pv::HdfFilePath)]
        );
        assert_eq!(
            c.get_args(t.name(Pv::CamTriggerMode)),
            vec!["-w", "1.000", "-t", "-n", t.name(Pv::CamTriggerMode)]
        );
        assert_eq!(
            c.get_args(t.name(Pv::CamModel)),
            vec!["-w", "1.000", "-t", t.name(Pv::CamModel)]
        );
    }

    /// Stand-in `caget` that prints `output` whatever it is asked.
    #[cfg(unix)]
    fn fake_caget(dir: &Path, output: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("caget");
        std::fs::write(&path, format!("#!/bin/sh\necho '{output}'\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_numeric_file_name_keeps_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let t = table();
        let c = CaToolsClient::new(
            fake_caget(dir.path(), "0012"),
            "caput".into(),
            Duration::from_secs(1),
        )
        .with_formats(&t);

        assert_eq!(c.get(t.name(Pv::HdfFileName)).await.unwrap(), PvValue::from("0012"));
        // numeric records are still parsed
        assert_eq!(c.get(t.name(Pv::CamNumImages)).await.unwrap(), PvValue::Int(12));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported_as_such() {
        let c = CaToolsClient::new(
            "/nonexistent/caget".into(),
            "caput".into(),
            Duration::from_secs(1),
        );
        let err = c.get("2bma:m49").await.unwrap_err();
        assert!(matches!(err, ScanError::PvTool { .. }));
        assert!(err.to_string().contains("/nonexistent/caget"));
    }
}
