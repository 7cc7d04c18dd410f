mod common;

use std::path::PathBuf;
use std::time::Duration;

use devbridge_session::{run_capture, AnalysisTool, BridgeError, ProcessSpec, ToolFlag};

use common::unique_temp_dir;

fn fixture_tool(name: &str, root: &std::path::Path) -> AnalysisTool {
    let script = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    AnalysisTool::new("sh", root).with_args([script.to_string_lossy().as_ref()])
}

#[test]
fn timeout_kills_and_keeps_partial_output() {
    let spec = ProcessSpec::new("sh").args(["-c", "echo partial; exec sleep 30"]);
    let run = run_capture(&spec, Duration::from_millis(300)).unwrap();
    assert!(run.timed_out);
    assert_eq!(run.exit_code, None);
    assert_eq!(run.output, "partial\n");
}

#[test]
fn tool_runs_in_project_root_with_flag_and_arg() {
    let root = unique_temp_dir("tool");
    let tool = fixture_tool("tool.sh", &root);

    let output = tool.invoke(ToolFlag::Callgraph, Some("main.go")).unwrap();
    let mut lines = output.lines();
    assert_eq!(lines.next(), Some("-callgraph main.go"));
    let cwd = lines.next().unwrap();
    assert!(cwd.ends_with(root.file_name().unwrap().to_str().unwrap()));

    let output = tool.invoke(ToolFlag::Workdir, None).unwrap();
    assert!(output.starts_with("-workdir\n"));
}

#[test]
fn failing_tool_surfaces_raw_output() {
    let root = unique_temp_dir("tool-fail");
    let tool = fixture_tool("failing-tool.sh", &root);
    let err = tool.invoke(ToolFlag::Compile, None).unwrap_err();
    assert!(matches!(err, BridgeError::ToolFailed { .. }));
    assert_eq!(err.to_string(), "cannot -compile\n");
}

#[test]
fn missing_tool_is_a_spawn_error() {
    let tool = AnalysisTool::new("devbridge-missing-tool", std::env::temp_dir());
    let err = tool.invoke(ToolFlag::PackFiles, None).unwrap_err();
    assert!(matches!(err, BridgeError::Spawn { .. }));
}
