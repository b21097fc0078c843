//! End-to-end build scenarios against the in-memory provider, using only
//! the public API.

use std::time::Duration;

use camino::Utf8PathBuf;
use ofen::builder::{BuildError, BuildPolicy, Builder, ResourceNames};
use ofen::provider::{ImageStatus, ProviderErrorKind};
use ofen::remote::{SshClient, SshConfig};
use ofen::spec::{BuildSpec, SpecDocument};
use ofen::test_support::{FakeOp, FakeProvider, ScriptedRunner};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

struct World {
    _work: TempDir,
    work_root: Utf8PathBuf,
    _files: TempDir,
    upload: Utf8PathBuf,
    provider: FakeProvider,
    runner: ScriptedRunner,
}

impl World {
    fn builder(&self) -> Builder<'_, FakeProvider, ScriptedRunner> {
        let ssh = SshClient::new(
            SshConfig {
                ssh_bin: String::from("ssh"),
                scp_bin: String::from("scp"),
                keygen_bin: String::from("ssh-keygen"),
                port: 22,
                connect_timeout_secs: 5,
                strict_host_key_checking: false,
                known_hosts_file: String::from("/dev/null"),
            },
            self.runner.clone(),
        )
        .expect("ssh client");
        Builder::with_names(
            &self.provider,
            ssh,
            BuildPolicy {
                launch_timeout: Duration::from_secs(5),
                ssh_attempts: 3,
                ssh_retry_delay: Duration::from_millis(1),
                upload_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(5),
                image_timeout: Duration::from_secs(5),
                teardown_timeout: Duration::from_secs(5),
            },
            ResourceNames::with_suffix("itest1"),
        )
    }

    fn spec(&self) -> BuildSpec {
        let value = json!({
            "name": "web-base",
            "description": "Web server base image",
            "user": "ubuntu",
            "instance_type": "DEV1-S",
            "base_image": {"name": "ubuntu-24.04"},
            "uploads": {self.upload.as_str(): "/etc/nginx/nginx.conf"},
            "commands": ["apt-get install -y nginx", "false", "systemctl enable nginx"],
            "tags": [{"owner": "platform"}]
        });
        SpecDocument::parse(&value.to_string())
            .and_then(|document| document.into_spec(false))
            .expect("spec is valid")
    }

    fn assert_clean(&self) {
        let live = self.provider.live_resources();
        assert!(live.is_empty(), "leaked resources: {live:?}");
        let left = std::fs::read_dir(&self.work_root).expect("read work root").count();
        assert_eq!(left, 0, "work area left behind");
    }
}

#[fixture]
fn world() -> World {
    let work = TempDir::new().expect("tempdir");
    let work_root = Utf8PathBuf::from_path_buf(work.path().to_path_buf()).expect("utf8");
    let files = TempDir::new().expect("tempdir");
    let upload = Utf8PathBuf::from_path_buf(files.path().join("nginx.conf")).expect("utf8");
    std::fs::write(&upload, "worker_processes 1;\n").expect("write upload");

    // The second configuration command exits 1; everything else succeeds.
    let runner = ScriptedRunner::new().with_keygen().succeed_when_empty();
    runner.push_success(); // connect
    runner.push_success(); // mkdir for the upload
    runner.push_success(); // scp
    runner.push_success(); // first command
    runner.push_exit_code(1); // second command

    World {
        _work: work,
        provider: FakeProvider::new().with_work_root(work_root.clone()),
        work_root,
        _files: files,
        upload,
        runner,
    }
}

#[rstest]
#[tokio::test]
async fn image_carries_name_description_and_user_tags(world: World) {
    let spec = world.spec();
    let mut builder = world.builder();

    let image = builder.bake(&spec).await.expect("build succeeds");

    let stored = world
        .provider
        .images()
        .into_iter()
        .find(|details| details.id == image.id)
        .expect("image stored");
    let keys: Vec<&str> = stored.properties.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, ["Name", "Description", "owner"]);
    world.assert_clean();
}

#[rstest]
#[tokio::test]
async fn uploads_precede_commands_and_failures_are_recorded(world: World) {
    let spec = world.spec();
    let mut builder = world.builder();

    builder.bake(&spec).await.expect("build succeeds");

    let exit_codes: Vec<Option<i32>> = builder
        .command_results()
        .iter()
        .map(|record| record.exit_code)
        .collect();
    assert_eq!(exit_codes, [Some(0), Some(1), Some(0)]);

    let programs: Vec<String> = world
        .runner
        .invocations()
        .iter()
        .map(|call| call.program.clone())
        .filter(|program| program == "scp" || program == "ssh")
        .collect();
    let scp_at = programs.iter().position(|program| program == "scp");
    assert_eq!(scp_at, Some(2), "connect and mkdir run before scp: {programs:?}");
}

#[rstest]
#[case::credential(FakeOp::CreateCredential)]
#[case::access_rule(FakeOp::CreateAccessRule)]
#[case::launch(FakeOp::Launch)]
#[case::status(FakeOp::PollStatus)]
#[case::snapshot(FakeOp::Snapshot)]
#[tokio::test]
async fn every_failure_point_leaves_nothing_behind(world: World, #[case] op: FakeOp) {
    world.provider.fail(op, ProviderErrorKind::Other);
    let spec = world.spec();
    let mut builder = world.builder();

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(
        matches!(err, BuildError::Provider { .. } | BuildError::QuotaOrCollision(_)),
        "unexpected error: {err}"
    );
    world.assert_clean();
}

#[rstest]
#[tokio::test]
async fn image_success_is_reported_only_once_available(world: World) {
    world.provider.script_image_statuses(&[
        ImageStatus::Pending,
        ImageStatus::Pending,
        ImageStatus::Available,
    ]);
    let spec = world.spec();
    let mut builder = world.builder();

    builder.bake(&spec).await.expect("build succeeds");

    assert_eq!(world.provider.call_count(FakeOp::ImageStatus), 3);
    world.assert_clean();
}
