use std::process::Command;

fn strata() -> Command {
    Command::new(env!("CARGO_BIN_EXE_strata"))
}

#[test]
fn parse_key_prints_kind_and_key() {
    let output = strata()
        .args(["parse-key", "summary_Depth_10_Epoch_2_Cluster_7.txt"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("kind: cluster_summary"), "{stdout}");
    assert!(stdout.contains("key: Depth_10 Epoch_2 Cluster_7"), "{stdout}");
}

#[test]
fn parse_key_rejects_foreign_names() {
    let output = strata().args(["parse-key", "notes.txt"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn keys_lists_artifacts_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let summaries = dir.path().join("cluster_summaries");
    std::fs::create_dir_all(&summaries).unwrap();
    std::fs::write(summaries.join("summary_Depth_2_Epoch_1_Cluster_0.txt"), "x").unwrap();
    std::fs::write(summaries.join("README.md"), "not an artifact").unwrap();

    let output = strata()
        .args(["keys", "--work-dir"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("cluster_summary (1)"), "{stdout}");
    assert!(stdout.contains("summary_Depth_2_Epoch_1_Cluster_0.txt"), "{stdout}");
    assert!(stdout.contains("partition_shard (0)"), "{stdout}");
    assert!(!stdout.contains("README.md"));
}

#[test]
fn run_with_bad_backend_fails_before_touching_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");

    let output = strata()
        .args(["run", "--work-dir"])
        .arg(&work)
        .env("STRATA_LLM_BACKEND", "carrier-pigeon")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(!work.exists());
}

#[test]
fn partition_only_run_needs_no_backend() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("data_encoded.csv");
    std::fs::write(
        &input,
        "layer,BlockNumber,TimeStamp,Hash,From,To,Value,TokenName,TokenSymbol,Cluster_Depth_1_Epoch_1\n\
         1,1,t,H0,F,T,1,N,S,0\n",
    )
    .unwrap();
    let work = dir.path().join("work");

    let output = strata()
        .args([
            "run",
            "--skip-summarize",
            "--skip-cluster-comparison",
            "--skip-epoch-comparison",
            "--skip-depth-comparison",
            "--input",
        ])
        .arg(&input)
        .arg("--work-dir")
        .arg(&work)
        .env("STRATA_LLM_BACKEND", "openrouter")
        .env_remove("OPENROUTER_API_KEY")
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(work.join("partitions/Depth_1_Epoch_1.csv").is_file());
    assert!(work.join("clusters/Depth_1_Epoch_1_Cluster_0.csv").is_file());
}
