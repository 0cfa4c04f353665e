//! A full healing run driven entirely by shell commands.

use std::sync::Arc;

use healing_core::{ModuleRecord, Orchestrator, OrchestratorConfig, Strategy, TaskStatus};
use healing_state::fakes::MemoryRecordLog;
use healing_state::{FsBaseline, ModuleId};
use healing_tools::{ToolCommand, ToolsConfig};
use tempfile::tempdir;

/// Reports a tangled profile unless the source mentions `healed`.
const ANALYZER: &str = r#"if grep -q healed; then
  echo '{"complexity": 8, "size": 200, "lint_issues": 0, "type_issues": 0}'
else
  echo '{"complexity": 50, "size": 400, "lint_issues": 20, "type_issues": 4}'
fi"#;

fn tools() -> ToolsConfig {
    ToolsConfig {
        regenerator: Some(ToolCommand::shell(
            r#"case "$HEAL_MODULE" in
  *broken*) echo 'def (' ;;
  *) printf '# healed by %s\n' "$HEAL_STRATEGY"; cat ;;
esac"#,
            10,
        )),
        analyzer: Some(ToolCommand::shell(ANALYZER, 10)),
        syntax_check: Some(ToolCommand::shell(
            "if grep -q 'def ('; then echo 'invalid syntax'; exit 1; fi",
            10,
        )),
        import_check: None,
        tests: Some(ToolCommand::shell("cat >/dev/null; true", 10)),
        benchmark: None,
    }
}

#[tokio::test]
async fn shell_tools_heal_a_module_tree() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("good.py"), "def f():\n    return 1\n").unwrap();
    std::fs::write(dir.path().join("broken.py"), "def g():\n    return 2\n").unwrap();

    let config = OrchestratorConfig {
        workers: 2,
        strategies: vec![Strategy::Decompose],
        max_variants: 1,
        max_retries: 0,
        regenerator_timeout_ms: 20_000,
        test_timeout_ms: 20_000,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(
        config,
        tools().toolchain().unwrap(),
        Arc::new(FsBaseline::new(dir.path()).unwrap()),
        Arc::new(MemoryRecordLog::new()),
    )
    .unwrap();

    let summary = orchestrator
        .run(vec![
            ModuleRecord::new("good.py", vec![]),
            ModuleRecord::new("broken.py", vec![ModuleId::new("good.py")]),
        ])
        .await
        .unwrap();

    let good = summary.report(&ModuleId::new("good.py")).unwrap();
    assert_eq!(good.status, TaskStatus::Accepted);
    let healed = std::fs::read_to_string(dir.path().join("good.py")).unwrap();
    assert!(healed.starts_with("# healed by decompose\n"));
    assert!(healed.ends_with("return 1\n"));

    let broken = summary.report(&ModuleId::new("broken.py")).unwrap();
    assert_eq!(broken.status, TaskStatus::Rejected);
    let syntax = &broken.validations[0].stages[0];
    assert!(!syntax.passed);
    assert!(syntax.diagnostic.contains("invalid syntax"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("broken.py")).unwrap(),
        "def g():\n    return 2\n"
    );
}

#[tokio::test]
async fn toolchain_from_heal_toml() {
    let toml = r#"
        workers = 1

        [tools.regenerator]
        command = ["cat"]

        [tools.analyzer]
        command = ["sh", "-c", "echo '{}'"]

        [tools.syntax_check]
        command = ["true"]

        [tools.tests]
        command = ["true"]

        [tools.benchmark]
        command = ["sh", "-c", "echo 3.5"]
    "#;
    let tools = ToolsConfig::from_heal_toml(toml).unwrap();
    let toolchain = tools.toolchain().unwrap();
    assert!(toolchain.benchmarker.is_some());

    let metrics = toolchain
        .analyzer
        .analyze(&ModuleId::new("m.py"), "x = 1\n")
        .await
        .unwrap();
    assert_eq!(metrics, healing_core::RawMetrics::unknown());
}
