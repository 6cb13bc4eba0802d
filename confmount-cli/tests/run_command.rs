use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

struct Mounter {
    child: Child,
}

impl Mounter {
    fn start(store: &Path, target: &Path, hook: &str) -> Self {
        let child = Command::new(assert_cmd::cargo::cargo_bin!("confmount"))
            .env_remove("KUBE_NAMESPACE")
            .args(["run", "-c", "cfg.ns", "-b", hook, "--store-dir"])
            .arg(store)
            .arg("-m")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn confmount run");
        Self { child }
    }
}

impl Drop for Mounter {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

fn write_manifest(path: &Path, body: &str) {
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, body).expect("write manifest");
    fs::rename(&tmp, path).expect("replace manifest");
}

fn read(path: PathBuf) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

#[test]
fn manifest_change_is_published_and_hook_runs() {
    let store = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    let target = mount.path().join("conf");
    let marker = mount.path().join("hook.log");
    fs::create_dir_all(store.path().join("ns")).unwrap();
    let manifest = store.path().join("ns/cfg.yaml");
    write_manifest(&manifest, "data:\n  app.conf: x=1\n");

    let hook = format!("cat '{}' >> '{}'", target.join("app.conf").display(), marker.display());
    let _mounter = Mounter::start(store.path(), &target, &hook);

    assert!(
        wait_until(Duration::from_secs(10), || read(target.join("app.conf")) == "x=1"),
        "initial publish"
    );
    // Startup publishes without running the hook.
    sleep(Duration::from_millis(300));
    assert_eq!(read(marker.clone()), "");

    write_manifest(&manifest, "data:\n  app.conf: x=2\n  extra: e\n");
    assert!(
        wait_until(Duration::from_secs(10), || read(marker.clone()) == "x=2"),
        "hook observed the new content"
    );
    assert_eq!(read(target.join("app.conf")), "x=2");
    assert_eq!(read(target.join("extra")), "e");

    write_manifest(&manifest, "data:\n  app.conf: x=2\n");
    assert!(
        wait_until(Duration::from_secs(10), || !target.join("extra").exists()),
        "removed key unlinked"
    );
}

#[test]
fn run_exits_non_zero_when_resource_is_missing() {
    let store = TempDir::new().unwrap();
    let mount = TempDir::new().unwrap();
    fs::create_dir_all(store.path().join("ns")).unwrap();

    let status = Command::new(assert_cmd::cargo::cargo_bin!("confmount"))
        .args(["run", "-c", "cfg.ns", "--store-dir"])
        .arg(store.path())
        .arg("-m")
        .arg(mount.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run confmount");
    assert!(!status.success());
}
