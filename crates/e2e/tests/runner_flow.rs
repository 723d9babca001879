//! Full case flow through the runner on a simulated translator page

use std::time::Duration;

use translit_e2e::config::{FlowConfig, PageConfig, RunnerConfig};
use translit_e2e::region::TieBreak;
use translit_e2e::simulated::{word_table, RenderBehavior, SimulatedSurface, Transform};
use translit_e2e::{CaseOutcome, FixtureSuite, TestRunner, WatchConfig};

const SIG: &str = ".w-full.h-80.ring-slate-300";

const SUITE: &str = r#"
name: simulated-singlish
tags: [simulated]
cases:
  - id: Pos_Fun_0001
    name: Simple present tense
    input: mama kadee yanavaa.
    expected: මම කඩේ යනවා.
  - id: Pos_Fun_0002
    name: Going home
    input: mama gedhara yanavaa.
    expected: මම ගෙදර යනවා.
  - id: Neg_Fun_0001
    name: Joined words stay joined
    input: mamagedhara yanavaa.
    expected: මම ගෙදර යනවා.
    tags: [negative]
  - id: Pos_UI_0001
    name: Real-time update while typing
    input: mama gedhara yanavaa.
    expected: මම ගෙදර යනවා.
    tags: [ui]
    mode:
      kind: type
      delay_ms: 20
      partial_input: mama gedhara
"#;

fn transform() -> Transform {
    word_table(&[
        ("mama", "මම"),
        ("kadee", "කඩේ"),
        ("gedhara", "ගෙදර"),
        ("yanavaa.", "යනවා."),
    ])
}

fn config(dir: &std::path::Path) -> RunnerConfig {
    RunnerConfig {
        fixtures_dir: dir.join("fixtures"),
        output_dir: dir.join("results"),
        page: PageConfig {
            url: "about:blank".into(),
            style_signature: SIG.into(),
            tie_break: TieBreak::DocumentOrder,
        },
        watch: WatchConfig {
            poll_interval_ms: 100,
            quiet_samples: 2,
            settle_delay_ms: 400,
            overall_timeout_ms: 5000,
            placeholders: Vec::new(),
        },
        flow: FlowConfig {
            clear_timeout_ms: 1000,
            type_delay_ms: 20,
            retry_invalidated: true,
        },
        ..Default::default()
    }
}

fn translator() -> SimulatedSurface {
    SimulatedSurface::translator_page(
        SIG,
        transform(),
        RenderBehavior {
            debounce: Duration::from_millis(300),
            blank_before_repaint: Some(Duration::from_millis(100)),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn suite_reports_passes_and_mismatches() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(translator(), config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap();

    let result = runner.run_suite(&suite).await;

    assert_eq!(result.total, 4);
    assert_eq!(result.passed, 3);
    assert_eq!(result.failed, 1);

    let negative = result.results.iter().find(|r| r.id == "Neg_Fun_0001").unwrap();
    assert_eq!(
        negative.outcome,
        CaseOutcome::Mismatch {
            expected: "මම ගෙදර යනවා.".into(),
            actual: "mamagedhara යනවා.".into(),
        }
    );

    let typed = result.results.iter().find(|r| r.id == "Pos_UI_0001").unwrap();
    assert!(typed.success(), "typed case failed: {:?}", typed.outcome);
    assert!(result.results.iter().all(|r| r.attempts == 1));
}

#[tokio::test(start_paused = true)]
async fn missing_output_is_reported_as_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let never: Transform = std::sync::Arc::new(|_: &str| String::new());
    let surface = SimulatedSurface::translator_page(SIG, never, RenderBehavior::default());
    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_Fun_0001");

    let result = runner.run_suite(&suite).await;
    assert!(matches!(
        result.results[0].outcome,
        CaseOutcome::NoOutput { waited_ms } if waited_ms == 5000
    ));
}

#[tokio::test(start_paused = true)]
async fn invalidated_output_is_re_resolved_once() {
    let dir = tempfile::tempdir().unwrap();
    let surface = translator();
    surface.schedule_replace("output", "output-2", Duration::from_millis(150));

    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_Fun_0001");

    let result = runner.run_suite(&suite).await;
    let case = &result.results[0];
    assert!(case.success(), "got {:?}", case.outcome);
    assert_eq!(case.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_without_retry_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let surface = translator();
    surface.schedule_replace("output", "output-2", Duration::from_millis(150));

    let mut config = config(dir.path());
    config.flow.retry_invalidated = false;
    let runner = TestRunner::new(surface, config).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_Fun_0001");

    let result = runner.run_suite(&suite).await;
    assert!(matches!(result.results[0].outcome, CaseOutcome::RegionInvalidated { .. }));
    assert_eq!(result.results[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn page_without_output_region_fails_per_case() {
    let dir = tempfile::tempdir().unwrap();
    let surface = SimulatedSurface::new().with_element(
        "input",
        SIG,
        translit_e2e::region::StructuralMarkers::text_entry("textarea"),
        "",
    );
    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_tag("negative");

    let result = runner.run_suite(&suite).await;
    assert!(matches!(result.results[0].outcome, CaseOutcome::RegionNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn run_all_loads_fixtures_and_writes_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    std::fs::create_dir_all(&config.fixtures_dir).unwrap();
    std::fs::write(config.fixtures_dir.join("singlish.yaml"), SUITE).unwrap();

    let runner = TestRunner::new(translator(), config).unwrap();
    let summary = runner.run_tagged("ui").await.unwrap();
    assert_eq!(summary.total, 1);
    assert!(summary.success());

    let path = runner.write_results(&summary).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["passed"], 1);
    assert_eq!(written["suites"][0]["results"][0]["outcome"]["status"], "passed");

    let single = runner.run_case_by_id("Pos_Fun_0002").await.unwrap();
    assert!(single.success());
    assert!(runner.run_case_by_id("Nope_0001").await.is_err());
}

fn slow_translator() -> SimulatedSurface {
    SimulatedSurface::translator_page(
        SIG,
        transform(),
        RenderBehavior {
            debounce: Duration::from_millis(1500),
            blank_before_repaint: None,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn previous_output_outlasting_the_clear_is_not_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(slow_translator(), config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap();
    let first = suite.filter_by_id("Pos_Fun_0001");
    let second = suite.filter_by_id("Pos_Fun_0002");

    let before = runner.run_suite(&first).await;
    assert!(before.results[0].success(), "got {:?}", before.results[0].outcome);

    // The clear never blanks the output within 1000 ms, so the first
    // case's rendering is still on screen when the second case starts
    let after = runner.run_suite(&second).await;
    assert!(after.results[0].success(), "got {:?}", after.results[0].outcome);
}

#[tokio::test(start_paused = true)]
async fn output_stuck_on_previous_text_is_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let constant: Transform = std::sync::Arc::new(|_: &str| "මම".to_string());
    let surface = SimulatedSurface::translator_page(
        SIG,
        constant,
        RenderBehavior {
            debounce: Duration::from_millis(1500),
            blank_before_repaint: None,
        },
    );
    surface.set_text("output", "මම").unwrap();

    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_Fun_0001");

    let result = runner.run_suite(&suite).await;
    assert!(
        matches!(result.results[0].outcome, CaseOutcome::NoOutput { waited_ms } if waited_ms == 5000),
        "got {:?}",
        result.results[0].outcome
    );
}

#[tokio::test(start_paused = true)]
async fn typed_prefix_without_output_is_partial_missing() {
    let dir = tempfile::tempdir().unwrap();
    let full_only: Transform = std::sync::Arc::new(|input: &str| {
        if input.contains("yanavaa") {
            "මම ගෙදර යනවා.".to_string()
        } else {
            String::new()
        }
    });
    let surface = SimulatedSurface::translator_page(SIG, full_only, RenderBehavior::default());
    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_UI_0001");

    let result = runner.run_suite(&suite).await;
    assert_eq!(
        result.results[0].outcome,
        CaseOutcome::PartialMissing {
            partial_input: "mama gedhara".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn churning_output_is_reported_as_unstable() {
    let dir = tempfile::tempdir().unwrap();
    let surface = translator();
    let churn = surface.clone();
    tokio::spawn(async move {
        for i in 0u64.. {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if churn.set_text("output", &format!("render {}", i)).is_err() {
                break;
            }
        }
    });

    let runner = TestRunner::new(surface, config(dir.path())).unwrap();
    let suite = FixtureSuite::from_yaml(SUITE).unwrap().filter_by_id("Pos_Fun_0001");

    let result = runner.run_suite(&suite).await;
    match &result.results[0].outcome {
        CaseOutcome::Unstable { waited_ms, last_text } => {
            assert_eq!(*waited_ms, 5000);
            assert!(last_text.starts_with("render "), "last text {:?}", last_text);
        }
        other => panic!("expected unstable, got {other:?}"),
    }
}
