use anyhow::Result;
use cs_filetests::{Arch, HarnessConfig, Mode, ReplayBackend, RunSummary, parse_test};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn manifest_path(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn transcript() -> Result<Arc<ReplayBackend>> {
    Ok(Arc::new(ReplayBackend::from_file(&manifest_path(
        "tests/fixtures/arm.json",
    ))?))
}

fn run_fixtures(paths: &[PathBuf], config: HarnessConfig) -> Result<RunSummary> {
    cs_filetests::run(paths, config, transcript()?)
}

// The detail corpus parses cleanly, with warnings for its known oddities.
#[test]
fn detail_corpus_parses() -> Result<()> {
    let text = std::fs::read_to_string(manifest_path("tests/cs_details/issue.cs"))?;
    let file = parse_test(&text, "issue.cs")?;

    assert_eq!(file.cases.len(), 51);
    let lines: usize = file.cases.iter().map(|c| c.lines.len()).sum();
    assert_eq!(lines, 53);
    assert!(file.cases.iter().all(|c| c.directive.arch == Arch::Arm));

    let multi: Vec<String> = file
        .cases
        .iter()
        .filter(|c| c.lines.len() > 1)
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(multi, vec!["issue.cs:67", "issue.cs:76"]);

    let warned: Vec<String> = file.warnings.iter().map(|w| w.location.to_string()).collect();
    assert_eq!(warned, vec!["3", "39", "43", "47", "51", "59"]);
    Ok(())
}

#[test]
fn detail_corpus_case_details() -> Result<()> {
    let text = std::fs::read_to_string(manifest_path("tests/cs_details/issue.cs"))?;
    let file = parse_test(&text, "issue.cs")?;

    let first = &file.cases[0];
    assert_eq!(first.id.to_string(), "issue.cs:3");
    assert_eq!(first.bytes, [0x90, 0xe8, 0x0e, 0x00]);
    assert_eq!(first.lines[0].text, "ldm.w r0, {r1, r2, r3}");
    assert!(first.description.as_deref().unwrap().starts_with("issue 0 ARM"));

    let it_hi = file
        .cases
        .iter()
        .find(|c| c.id.location.to_string() == "76")
        .unwrap();
    assert!(it_hi.directive.modes.contains(Mode::Thumb));
    assert!(it_hi.directive.modes.contains(Mode::V8));
    assert_eq!(it_hi.lines[0].span, 0..2);
    assert_eq!(it_hi.lines[1].span, 2..6);

    // The last case has no trailing `;`.
    let last = file.cases.last().unwrap();
    assert_eq!(last.lines[0].text, "ldrhi pc, [r1, #0x3ef]");
    Ok(())
}

// Every case is for ARM, so selecting another architecture skips them all.
#[test]
fn selection_skips_unselected_cases() -> Result<()> {
    let config = HarnessConfig {
        arch: Some("x86".to_string()),
        ..HarnessConfig::default()
    };
    let summary = run_fixtures(&[manifest_path("tests/cs_details")], config)?;
    assert_eq!(summary.cases, 51);
    assert_eq!(summary.skipped, 51);
    assert_eq!(summary.passed, 0);
    assert_eq!(summary.warnings, 6);
    assert!(summary.success());
    Ok(())
}

#[test]
fn fixtures_pass_against_transcript() -> Result<()> {
    let summary = run_fixtures(&[manifest_path("tests/fixtures")], HarnessConfig::default())?;
    assert!(summary.failures.is_empty(), "{summary}");
    assert_eq!(summary.cases, 10);
    assert_eq!(summary.passed, 10);
    assert_eq!(summary.warnings, 0);
    Ok(())
}

#[test]
fn mode_selection() -> Result<()> {
    let config = HarnessConfig {
        modes: vec!["CS_MODE_THUMB".to_string()],
        threads: Some(2),
        ..HarnessConfig::default()
    };
    let summary = run_fixtures(&[manifest_path("tests/fixtures")], config)?;
    assert_eq!(summary.passed, 7);
    assert_eq!(summary.skipped, 3);
    Ok(())
}

#[test]
fn mismatches_are_reported_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("wrong.cs");
    std::fs::write(
        &path,
        "\
!# wrong flag
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x61,0xb6 == cpsie f ; CPSI-mode: 2 ; CPSI-flag: 2 ;

!# CS_ARCH_ARM, CS_MODE_ARM, CS_OPT_DETAIL
0x0f,0x00,0x71,0xe3 == cmn r1, #15 ; operands[1].type: IMM = 0xf ;

!# CS_ARCH_ARM, CS_MODE_ARM, CS_OPT_DETAIL
0x0f,0x00,0x71,0xe3 == cmp r1, #15 ;

!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x00,0x00 == movs r0, r0 ;
",
    )?;
    let summary = run_fixtures(&[path.clone()], HarnessConfig::default())?;
    assert_eq!((summary.cases, summary.passed, summary.failed), (4, 1, 3));

    let name = path.display();
    let lines: Vec<String> = summary.failures.iter().map(|f| f.to_string()).collect();
    assert_eq!(
        lines,
        vec![
            format!("FAIL {name}:3: CPSI-flag: expected 2, actual 1"),
            format!("FAIL {name}:9: text: expected cmp r1, #15, actual cmn r1, #15"),
            format!(
                "FAIL {name}:12: decode: expected movs r0, r0, \
                 actual invalid or unsupported encoding at offset 0: 0x00,0x00"
            ),
        ]
    );
    assert_eq!(summary.failures[0].description.as_deref(), Some("wrong flag"));
    assert!(!summary.success());
    Ok(())
}

// A governed instruction whose recorded condition contradicts its block fails.
#[test]
fn contradicting_block_condition() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let transcript = dir.path().join("t.json");
    std::fs::write(
        &transcript,
        r#"[
        {"arch": "arm", "modes": ["thumb"], "bytes": "0x14,0xbf",
         "insn": {"mnemonic": "ite", "op_str": "ne"}},
        {"arch": "arm", "modes": ["thumb"], "bytes": "0x01,0x20",
         "insn": {"mnemonic": "movne", "op_str": "r0, #1"}},
        {"arch": "arm", "modes": ["thumb"], "bytes": "0x00,0x20",
         "insn": {"mnemonic": "moveq", "op_str": "r0, #0", "code_condition": 1}}
    ]"#,
    )?;
    let fixture = dir.path().join("ite.cs");
    std::fs::write(
        &fixture,
        "\
!# CS_ARCH_ARM, CS_MODE_THUMB
0x14,0xbf == ite ne ;
0x01,0x20 == movne r0, #1 ; Code condition: 1 ;
0x00,0x20 == moveq r0, #0 ;
",
    )?;
    let backend = Arc::new(ReplayBackend::from_file(&transcript)?);
    let summary = cs_filetests::run(&[fixture], HarnessConfig::default(), backend)?;
    assert_eq!(summary.failed, 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.line, 2);
    assert_eq!(failure.mismatch.to_string(), "Code condition: expected 0, actual 1");
    Ok(())
}

// An `it` block left open at the end of a case does not govern the next case.
#[test]
fn block_state_ends_with_the_case() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let transcript = dir.path().join("t.json");
    std::fs::write(
        &transcript,
        r##"[
        {"arch": "arm", "modes": ["thumb"], "bytes": "0x04,0xbf",
         "insn": {"mnemonic": "itt", "op_str": "eq", "code_condition": 0}},
        {"arch": "arm", "modes": ["thumb"], "bytes": "0x00,0xd1",
         "insn": {"mnemonic": "bne", "op_str": "#4", "code_condition": 1}}
    ]"##,
    )?;
    let fixture = dir.path().join("open.cs");
    std::fs::write(
        &fixture,
        "\
!# CS_ARCH_ARM, CS_MODE_THUMB, CS_OPT_DETAIL
0x04,0xbf == itt eq ; Code condition: 0 ;
!# branch after an unfinished block
0x00,0xd1 == bne #4 ; Code condition: 1 ;
",
    )?;
    let backend = Arc::new(ReplayBackend::from_file(&transcript)?);
    let summary = cs_filetests::run(&[fixture], HarnessConfig::default(), backend)?;
    assert!(summary.failures.is_empty(), "{summary}");
    assert_eq!((summary.cases, summary.passed), (2, 2));
    Ok(())
}

#[test]
fn syntax_errors_abort_the_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("good.cs"), "")?;
    std::fs::write(dir.path().join("bad.cs"), "0x00 == nop ;\n")?;
    let e = run_fixtures(&[dir.path().to_path_buf()], HarnessConfig::default()).unwrap_err();
    assert!(e.to_string().contains("bad.cs:1:"), "{e}");
    Ok(())
}
