use crate::config::{parse_work_items, ConfigErrors, RunnerConfig};
use std::{fs, path::PathBuf};
use tempfile::tempdir;

const MINIMAL: &str = r#"
work_items: [proj/v1, proj/v2]
node_dir: /scratch/n07/
command: benchbuild run -E JustCompile "$NODESHARE_WORK_ITEM"
log: /home/user/logs/run
slurm:
  account: ls-project
  partition: anywhere
"#;

#[test]
pub fn defaults_are_applied() {
    let config = RunnerConfig::parse(MINIMAL).unwrap();

    assert_eq!(config.node_dir, PathBuf::from("/scratch/n07/"));
    assert!(config.env.is_empty());
    assert_eq!(config.container.root, PathBuf::from("containers/lib"));
    assert_eq!(config.container.runroot, PathBuf::from("containers/run"));
    assert_eq!(config.slurm.max_running, 0);
    assert_eq!(config.slurm.cleanup_nice, 2147483645);
    assert_eq!(config.slurm.cleanup_time, "15:00");
    assert_eq!(config.slurm.submit_timeout_secs, 60);
    assert_eq!(config.slurm.sbatch, PathBuf::from("sbatch"));
    assert_eq!(config.slurm.script_dir, None);
    assert!(config.preflight_checks().is_ok());
}

#[test]
pub fn unknown_fields_are_rejected() {
    let yaml = format!("{MINIMAL}unknown: 1\n");

    assert!(matches!(
        RunnerConfig::parse(&yaml),
        Err(ConfigErrors::ParseConfig(_))
    ));
}

#[test]
pub fn preflight_reports_invalid_values() {
    let mut config = RunnerConfig::parse(MINIMAL).unwrap();
    config.node_dir = PathBuf::from("scratch/n07");
    config.command = String::from("  ");
    config.slurm.account = String::new();

    assert!(matches!(
        config.preflight_checks(),
        Err(ConfigErrors::Preflight)
    ));
}

#[test]
pub fn preflight_requires_work_items() {
    let mut config = RunnerConfig::parse(MINIMAL).unwrap();
    config.work_items.clear();

    assert!(matches!(
        config.preflight_checks(),
        Err(ConfigErrors::Preflight)
    ));
    assert!(matches!(
        config.resolve_work_items(),
        Err(ConfigErrors::NoWorkItems)
    ));
}

#[test]
pub fn work_items_file_is_appended() {
    let root = tempdir().unwrap();
    let path = root.path().join("items.txt");
    fs::write(&path, "# generated\nproj/v3\n\n  other/v1  \n").unwrap();

    let mut config = RunnerConfig::parse(MINIMAL).unwrap();
    config.work_items_file = Some(path);

    assert_eq!(
        config.resolve_work_items().unwrap(),
        vec!["proj/v1", "proj/v2", "proj/v3", "other/v1"]
    );
}

#[test]
pub fn missing_work_items_file() {
    let root = tempdir().unwrap();
    let mut config = RunnerConfig::parse(MINIMAL).unwrap();
    config.work_items_file = Some(root.path().join("missing.txt"));

    assert!(matches!(
        config.resolve_work_items(),
        Err(ConfigErrors::ReadWorkItems { .. })
    ));
}

#[test]
pub fn comments_and_blank_lines_are_skipped() {
    assert_eq!(
        parse_work_items("a/1\n#b/2\n\nc/3").collect::<Vec<_>>(),
        vec!["a/1", "c/3"]
    );
}

#[test]
pub fn load_missing_file() {
    assert!(matches!(
        RunnerConfig::load(&PathBuf::from("/nonexistent/nodeshare.yml")),
        Err(ConfigErrors::ReadConfig { .. })
    ));
}

#[test]
pub fn preflight_rejects_values_breaking_sbatch_headers() {
    let config = RunnerConfig::parse(MINIMAL).unwrap();
    assert!(config.preflight_checks().is_ok());

    let mut injected = config.clone();
    injected.slurm.account = String::from("ls-project\n#SBATCH --uid=0");
    assert!(matches!(
        injected.preflight_checks(),
        Err(ConfigErrors::Preflight)
    ));

    let mut spaced = config.clone();
    spaced.slurm.partition = String::from("any where");
    assert!(matches!(spaced.preflight_checks(), Err(ConfigErrors::Preflight)));

    let mut named = config.clone();
    named.slurm.job_name = String::from("node\tshare");
    assert!(matches!(named.preflight_checks(), Err(ConfigErrors::Preflight)));

    let mut timed = config;
    timed.slurm.cleanup_time = String::new();
    assert!(matches!(timed.preflight_checks(), Err(ConfigErrors::Preflight)));
}

#[test]
pub fn preflight_requires_a_node_directory_name() {
    let mut config = RunnerConfig::parse(MINIMAL).unwrap();
    config.node_dir = PathBuf::from("/");

    assert!(matches!(
        config.preflight_checks(),
        Err(ConfigErrors::Preflight)
    ));
}
