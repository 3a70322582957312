use std::fs;
use std::process::{Command, Output};

const MISSING_CLASSIFIER: &str = "missing_svm_predict_for_cli_smoke_test";

fn run_binary(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_snvscan"))
        .args(args)
        .output()
        .expect("expected snvscan binary to execute")
}

#[test]
fn emit_lists_numbered_feature_columns() {
    let output = run_binary(&["emit"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).expect("expected utf8 stdout");
    let lines = stdout.lines().collect::<Vec<_>>();
    assert!(!lines.is_empty());
    for (index, line) in lines.iter().enumerate() {
        let (number, description) = line.split_once('\t').expect("expected tab separated line");
        assert_eq!(number, (index + 1).to_string());
        assert!(!description.is_empty());
    }
}

#[test]
fn call_without_model_fails() {
    let output = run_binary(&["call", "-R", "genome.fa", "-B", "reads.bam"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("snvscan: missing required argument: --model"),
        "stderr: {stderr}"
    );
}

#[test]
fn conflicting_interval_sources_are_rejected() {
    let output = run_binary(&[
        "coverage",
        "-R",
        "genome.fa",
        "-B",
        "reads.bam",
        "-L",
        "1:1-100",
        "--known-sites",
        "sites.vcf",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("snvscan: "));
}

#[test]
fn call_reports_missing_classifier_binary() {
    let dir = tempfile::tempdir().expect("expected tempdir");
    let fasta = dir.path().join("genome.fa");
    fs::write(&fasta, ">1\nACGTACGTAC\n").expect("expected fasta write");
    fs::write(dir.path().join("genome.fa.fai"), "1\t10\t3\t10\t11\n").expect("expected fai write");
    let model = dir.path().join("model.svm");
    fs::write(&model, "svm_type c_svc\n").expect("expected model write");
    let fasta = fasta.to_string_lossy().into_owned();
    let model = model.to_string_lossy().into_owned();

    let output = run_binary(&[
        "call",
        "-R",
        &fasta,
        "-B",
        "reads.bam",
        "-M",
        &model,
        "--svm-predict",
        MISSING_CLASSIFIER,
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(MISSING_CLASSIFIER), "stderr: {stderr}");
}
