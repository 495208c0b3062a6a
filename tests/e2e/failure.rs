use crate::e2e::*;

#[test]
fn failure_then_fix() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "livebuild.json",
        r#"{
  "targets": [
    { "out": "out/ok.txt", "command": "grep -q ok in.txt && cp in.txt out/ok.txt",
      "inputs": ["in.txt"], "description": "CHECK" },
    { "out": "out/after.txt", "command": "cp out/ok.txt out/after.txt",
      "inputs": ["out/ok.txt"], "description": "AFTER" }
  ]
}"#,
    )?;
    space.write("in.txt", "bad")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("failed: CHECK")?;
    run.wait_watching()?;

    space.write("in.txt", "ok")?;
    run.expect_line("built CHECK")?;
    run.expect_line("built AFTER")?;
    assert_eq!(space.read("out/after.txt")?, "ok");
    Ok(())
}

#[test]
fn failure_output_is_shown() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "livebuild.json",
        r#"{
  "targets": [
    { "out": "out/x", "command": "echo broken-build >&2; exit 1", "inputs": ["in.txt"] }
  ]
}"#,
    )?;
    space.write("in.txt", "")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("failed: out/x")?;
    run.expect_line("broken-build")?;
    Ok(())
}
