use std::path::Path;

use bias_harness::dataset::{export_prompts, load_rows, DatasetError, ExportOptions};
use bias_harness::gateway::CanonicalPrompt;
use tempfile::tempdir;

fn options(root: &Path) -> ExportOptions {
    ExportOptions {
        prompts_dir: root.join("prompts_json"),
        outputs_dir: root.join("outputs"),
        ..ExportOptions::default()
    }
}

fn read_prompt(path: &Path) -> CanonicalPrompt {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn jsonl_rows_become_single_turn_prompts() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("clear_bias.jsonl");
    std::fs::write(
        &dataset,
        concat!(
            "{\"BIAS CATEGORY\": \"gender\", \"PROMPT\": \"Complete: The nurse said...\"}\n",
            "\n",
            "{\"BIAS CATEGORY\": \"age\"}\n",
            "{\"BIAS CATEGORY\": \"religion\", \"PROMPT\": \"Who prays?\"}\n",
        ),
    )
    .unwrap();

    let opts = options(dir.path());
    let written = export_prompts(&dataset, &opts).unwrap();

    // Row indices are kept, so the row without a prompt leaves a gap.
    assert_eq!(
        written,
        vec![
            opts.prompts_dir.join("prompt_0.json"),
            opts.prompts_dir.join("prompt_2.json"),
        ]
    );
    let prompt = read_prompt(&written[0]);
    assert_eq!(prompt.turns().len(), 1);
    assert_eq!(prompt.primary_text(), "Complete: The nurse said...");
    assert!(opts.outputs_dir.is_dir());

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&written[1]).unwrap()).unwrap();
    assert_eq!(
        raw,
        serde_json::json!({"messages": [{"role": "user", "content": [{"text": "Who prays?"}]}]})
    );
}

#[test]
fn json_array_with_limit_and_custom_field() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("rows.json");
    std::fs::write(
        &dataset,
        r#"[{"text": "a"}, {"text": "b"}, {"text": "c"}]"#,
    )
    .unwrap();

    let opts = ExportOptions {
        text_field: "text".into(),
        limit: 2,
        ..options(dir.path())
    };
    let written = export_prompts(&dataset, &opts).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(read_prompt(&written[1]).primary_text(), "b");

    let all = ExportOptions { limit: 0, ..opts };
    assert_eq!(export_prompts(&dataset, &all).unwrap().len(), 3);
}

#[test]
fn clean_removes_stale_prompts_and_outputs() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("rows.jsonl");
    std::fs::write(&dataset, "{\"PROMPT\": \"fresh\"}\n").unwrap();

    let opts = options(dir.path());
    std::fs::create_dir_all(&opts.prompts_dir).unwrap();
    std::fs::create_dir_all(&opts.outputs_dir).unwrap();
    std::fs::write(opts.prompts_dir.join("prompt_9.json"), "{}").unwrap();
    std::fs::write(opts.outputs_dir.join("prompt_9-output.json"), "{}").unwrap();

    let keep = ExportOptions {
        clean: false,
        ..options(dir.path())
    };
    export_prompts(&dataset, &keep).unwrap();
    assert!(opts.prompts_dir.join("prompt_9.json").exists());

    export_prompts(&dataset, &opts).unwrap();
    assert!(!opts.prompts_dir.join("prompt_9.json").exists());
    assert!(!opts.outputs_dir.join("prompt_9-output.json").exists());
    assert!(opts.prompts_dir.join("prompt_0.json").exists());
}

#[test]
fn invalid_line_reports_line_number() {
    let dir = tempdir().unwrap();
    let dataset = dir.path().join("bad.jsonl");
    std::fs::write(&dataset, "{\"PROMPT\": \"ok\"}\n{not json}\n").unwrap();

    match load_rows(&dataset) {
        Err(DatasetError::Row { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected row error, got {other:?}"),
    }
}

#[test]
fn missing_dataset_is_io_error() {
    let dir = tempdir().unwrap();
    let err = export_prompts(&dir.path().join("absent.jsonl"), &options(dir.path())).unwrap_err();
    assert!(matches!(err, DatasetError::Io { .. }));
}
