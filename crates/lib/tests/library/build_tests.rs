use buildchain_lib::execute::{BuildGraph, ConfigError, ExecuteError, NotAttempted, build, clean, is_up_to_date};
use buildchain_lib::fingerprint::FingerprintStore;
use buildchain_lib::target::{CopyFile, Directory, FileTree, Target, TemplateFile};

use super::common::TestEnv;

#[tokio::test]
async fn template_renders_context_values() {
  let env = TestEnv::new();
  let source = env.write_file("src/version.txt.in", "version=@VERSION@\nmail=ops@@example.com\n");

  let template = TemplateFile::new(&source, env.path("out/version.txt")).with("VERSION", "1.2.3");
  let graph = BuildGraph::build(vec![template.declare()]).unwrap();

  let report = build::<&str>(&graph, &[], &env.config()).await.unwrap();
  assert!(report.is_success(), "{:?}", report.failed);

  let rendered = env.read_file("out/version.txt");
  assert!(rendered.contains("1.2.3"));
  assert!(!rendered.contains("@VERSION@"));
  assert!(rendered.contains("ops@example.com"));
}

#[tokio::test]
async fn unresolved_placeholder_fails_without_output() {
  let env = TestEnv::new();
  let source = env.write_file("src/top.sls.in", "@MISSING@\n");

  let template = TemplateFile::new(&source, env.path("out/top.sls"));
  let graph = BuildGraph::build(vec![template.declare()]).unwrap();

  let report = build::<&str>(&graph, &[], &env.config()).await.unwrap();
  assert!(matches!(report.failed.get("top.sls"), Some(ExecuteError::Template { .. })));
  assert!(!env.path("out/top.sls").exists());
}

#[test]
fn colliding_tree_destinations_are_rejected() {
  let env = TestEnv::new();
  env.write_file("one/a.txt", "one");
  env.write_file("two/a.txt", "two");

  let first = FileTree::new("first", env.path("one"), env.path("out")).entry("a.txt");
  let second = FileTree::new("second", env.path("two"), env.path("out")).entry("a.txt");

  let mut decls = first.plan().unwrap();
  decls.extend(second.plan().unwrap());

  match BuildGraph::build(decls) {
    Err(ConfigError::DuplicateOutput { path, first, second }) => {
      assert_eq!(path, env.path("out/a.txt"));
      assert_eq!(first, "first:a.txt");
      assert_eq!(second, "second:a.txt");
    }
    other => panic!("expected duplicate output, got {other:?}"),
  }
  assert!(!env.path("out").exists());
}

#[tokio::test]
async fn rebuild_is_idempotent_and_tracks_sources() {
  let env = TestEnv::new();
  env.write_file("src/salt/foo.sls", "foo: 1");
  env.write_file("src/salt/top.sls.in", "base: @VERSION@");
  let marker = env.write_file("VERSION", "1.2.3");

  let tree = FileTree::new("salt_tree", env.path("src"), env.path("root"))
    .entry("salt/foo.sls")
    .entry(
      TemplateFile::new(env.path("src/salt/top.sls.in"), env.path("root/salt/top.sls"))
        .with("VERSION", "1.2.3")
        .file_dep(&marker),
    );
  let mut decls = vec![Directory::new("iso_mkdir_root", env.path("root")).declare()];
  decls.extend(tree.plan().unwrap());
  let graph = BuildGraph::build(decls).unwrap();
  let config = env.config();

  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(report.is_success());
  assert_eq!(report.executed.len(), 3);

  let store = FingerprintStore::load(&config.state_dir);
  for decl in graph.targets().filter(|d| !d.is_group()) {
    assert!(is_up_to_date(decl, &store), "{} should be up to date", decl.name);
  }

  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(report.executed.is_empty());

  // Touching the version marker only rebuilds the template
  env.write_file("VERSION", "1.2.4");
  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  let rebuilt: Vec<_> = report.executed.keys().map(String::as_str).collect();
  assert_eq!(rebuilt, vec!["salt_tree:salt/top.sls"]);
}

#[cfg(unix)]
#[tokio::test]
async fn failure_skips_dependents_but_not_siblings() {
  use buildchain_lib::action::{Action, CmdAction, Command};
  use buildchain_lib::target::TargetDecl;

  let env = TestEnv::new();
  env.write_file("src/ok.txt", "ok");

  let broken = TargetDecl::new("broken")
    .output(env.path("out/broken"))
    .action(Action::Cmd(CmdAction {
      command: Command::new("/bin/sh").arg("-c").arg("echo disk full >&2; exit 3"),
      stage: None,
    }));
  let dependent = CopyFile::new(env.path("src/ok.txt"), env.path("out/dependent.txt")).declare().task_dep("broken");
  let transitive = CopyFile::new(env.path("out/dependent.txt"), env.path("out/transitive.txt")).declare();
  let sibling = CopyFile::new(env.path("src/ok.txt"), env.path("out/sibling.txt")).declare();

  let graph = BuildGraph::build(vec![broken, dependent, transitive, sibling]).unwrap();
  let report = build::<&str>(&graph, &[], &env.config()).await.unwrap();

  assert!(!report.is_success());
  match report.failed.get("broken") {
    Some(ExecuteError::CmdFailed { code, stderr, .. }) => {
      assert_eq!(*code, Some(3));
      assert!(stderr.contains("disk full"));
    }
    other => panic!("unexpected failure: {other:?}"),
  }
  assert_eq!(
    report.skipped.get("dependent.txt"),
    Some(&NotAttempted::DependencyFailed("broken".to_string()))
  );
  assert_eq!(
    report.skipped.get("transitive.txt"),
    Some(&NotAttempted::DependencyFailed("broken".to_string()))
  );
  assert!(report.executed.contains_key("sibling.txt"));
  assert!(!env.path("out/dependent.txt").exists());
  assert!(!env.path("out/transitive.txt").exists());
}

#[tokio::test]
async fn clean_then_not_up_to_date() {
  let env = TestEnv::new();
  env.write_file("src/a.txt", "a");

  let tree = FileTree::new("tree", env.path("src"), env.path("out")).entry("a.txt");
  let graph = BuildGraph::build(tree.plan().unwrap()).unwrap();
  let config = env.config();

  build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(env.path("out/a.txt").exists());

  let report = clean::<&str>(&graph, &[], &config).unwrap();
  assert!(report.is_success());
  assert_eq!(report.removed, vec![env.path("out/a.txt")]);

  let store = FingerprintStore::load(&config.state_dir);
  let decl = graph.get("tree:a.txt").unwrap();
  assert!(!is_up_to_date(decl, &store));

  // Cleaning again removes nothing and still succeeds
  let report = clean::<&str>(&graph, &[], &config).unwrap();
  assert!(report.is_success());
  assert!(report.removed.is_empty());
}

#[tokio::test]
async fn corrupt_fingerprint_store_forces_rebuild() {
  let env = TestEnv::new();
  env.write_file("src/a.txt", "a");

  let graph = BuildGraph::build(vec![
    CopyFile::new(env.path("src/a.txt"), env.path("out/a.txt")).declare(),
  ])
  .unwrap();
  let config = env.config();

  build::<&str>(&graph, &[], &config).await.unwrap();
  env.write_file("state/fingerprints.json", "{ not json");

  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(report.is_success());
  assert!(report.executed.contains_key("a.txt"));

  // The store was replaced, so the next run is a no-op again
  let report = build::<&str>(&graph, &[], &config).await.unwrap();
  assert!(report.executed.is_empty());
}
