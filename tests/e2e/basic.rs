use crate::e2e::*;

const COPY_MANIFEST: &str = r#"{
  "targets": [
    { "out": "out/copy.txt", "command": "cp in.txt out/copy.txt", "inputs": ["in.txt"] }
  ]
}"#;

#[test]
fn builds_on_start() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("livebuild.json", COPY_MANIFEST)?;
    space.write("in.txt", "hello")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("built out/copy.txt")?;
    assert_eq!(space.read("out/copy.txt")?, "hello");
    Ok(())
}

#[test]
fn rebuilds_on_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("livebuild.json", COPY_MANIFEST)?;
    space.write("in.txt", "one")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("built out/copy.txt")?;
    run.wait_watching()?;

    space.write("in.txt", "two")?;
    run.expect_line("built out/copy.txt")?;
    assert_eq!(space.read("out/copy.txt")?, "two");
    Ok(())
}

#[test]
fn incremental_waits_for_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("livebuild.json", COPY_MANIFEST)?;
    space.write("in.txt", "one")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50", "--incremental"]))?;
    run.wait_watching()?;
    space.write("in.txt", "two")?;
    run.expect_line("built out/copy.txt")?;
    assert_eq!(space.read("out/copy.txt")?, "two");
    Ok(())
}

/// Uses inotify, with the default debounce interval.
#[cfg(target_os = "linux")]
#[test]
fn burst_of_writes_builds_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("livebuild.json", COPY_MANIFEST)?;
    space.write("in.txt", "v0")?;

    let mut run = space.spawn(&mut livebuild_command(&["--incremental"]))?;
    run.wait_watching()?;
    for i in 1..=5 {
        space.write("in.txt", &format!("v{}", i))?;
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    run.expect_line("built out/copy.txt")?;
    assert_eq!(space.read("out/copy.txt")?, "v5");
    run.expect_no_line("built", std::time::Duration::from_millis(1500))?;
    Ok(())
}

#[test]
fn cascades_through_chain() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "livebuild.json",
        r#"{
  "targets": [
    { "out": "out/upper.txt", "command": "tr a-z A-Z < in.txt > out/upper.txt",
      "inputs": ["in.txt"], "description": "UPPER" },
    { "out": "out/final.txt", "command": "cat out/upper.txt out/upper.txt > out/final.txt",
      "inputs": ["out/upper.txt"], "description": "DOUBLE" }
  ]
}"#,
    )?;
    space.write("in.txt", "ab")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("built UPPER")?;
    run.expect_line("built DOUBLE")?;
    assert_eq!(space.read("out/final.txt")?, "ABAB");
    run.wait_watching()?;

    space.write("in.txt", "cd")?;
    run.expect_line("built UPPER")?;
    run.expect_line("built DOUBLE")?;
    assert_eq!(space.read("out/final.txt")?, "CDCD");
    Ok(())
}

#[test]
fn discovers_depfile_deps() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "livebuild.json",
        r#"{
  "targets": [
    { "out": "out/all.txt",
      "command": "cat main.txt header.txt > out/all.txt && echo 'out/all.txt: main.txt header.txt' > out/all.d",
      "inputs": ["main.txt"], "depfile": "out/all.d", "description": "CAT" }
  ]
}"#,
    )?;
    space.write("main.txt", "main ")?;
    space.write("header.txt", "v1")?;

    let mut run = space.spawn(&mut livebuild_command(&["--poll", "50"]))?;
    run.expect_line("built CAT")?;
    assert_eq!(space.read("out/all.txt")?, "main v1");
    run.wait_watching()?;

    // Only known through the depfile written by the first build.
    space.write("header.txt", "v2")?;
    run.expect_line("built CAT")?;
    assert_eq!(space.read("out/all.txt")?, "main v2");
    Ok(())
}

#[test]
fn bad_manifest() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("livebuild.json", r#"{"targets": [{"out": "x"}]}"#)?;
    let out = space.run(&mut livebuild_command(&[]))?;
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("livebuild: error: "), "{}", stdout);
    Ok(())
}
