//! Unit tests for the build state machine and its teardown guarantees.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::provider::{ImageStatus, InstanceAddresses, InstanceStatus, ProviderErrorKind};
use crate::remote::{RemoteError, SshClient, SshConfig};
use crate::spec::SpecDocument;
use crate::test_support::{FAKE_FLOATING_ADDRESS, FakeOp, FakeProvider, ScriptedRunner};

struct Harness {
    _root: TempDir,
    root: Utf8PathBuf,
    provider: FakeProvider,
    runner: ScriptedRunner,
}

impl Harness {
    fn builder(&self, policy: BuildPolicy) -> Builder<'_, FakeProvider, ScriptedRunner> {
        let ssh = SshClient::new(ssh_config(), self.runner.clone()).expect("ssh client");
        Builder::with_names(
            &self.provider,
            ssh,
            policy,
            ResourceNames::with_suffix("test01"),
        )
    }

    fn work_areas_left(&self) -> usize {
        std::fs::read_dir(&self.root).expect("read root").count()
    }
}

fn ssh_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        keygen_bin: String::from("ssh-keygen"),
        port: 22,
        connect_timeout_secs: 5,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
    }
}

fn fast_policy() -> BuildPolicy {
    BuildPolicy {
        launch_timeout: Duration::from_secs(5),
        ssh_attempts: 3,
        ssh_retry_delay: Duration::from_millis(1),
        upload_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(5),
        image_timeout: Duration::from_secs(5),
        teardown_timeout: Duration::from_secs(5),
    }
}

fn harness_with(runner: ScriptedRunner) -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
    let provider = FakeProvider::new().with_work_root(root.clone());
    Harness {
        _root: tmp,
        root,
        provider,
        runner,
    }
}

/// Every remote command fails unless scripted.
#[fixture]
fn harness() -> Harness {
    harness_with(ScriptedRunner::new().with_keygen())
}

/// Remote commands succeed once the script runs out.
#[fixture]
fn happy() -> Harness {
    harness_with(ScriptedRunner::new().with_keygen().succeed_when_empty())
}

fn spec_from(value: &serde_json::Value) -> BuildSpec {
    SpecDocument::parse(&value.to_string())
        .expect("spec parses")
        .into_spec(false)
        .expect("spec is valid")
}

#[fixture]
fn spec() -> BuildSpec {
    spec_from(&json!({
        "name": "web-base",
        "description": "Web server base image",
        "user": "ubuntu",
        "instance_type": "DEV1-S",
        "base_image": {"local": "ubuntu-24.04"},
        "uploads": {},
        "commands": ["apt-get update", "false", "touch /done"]
    }))
}

/// A spec that asks for a floating IP on the `tenant` network.
#[fixture]
fn floating_spec() -> BuildSpec {
    spec_from(&json!({
        "name": "web-base",
        "description": "Web server base image",
        "user": "ubuntu",
        "instance_type": "m1.small",
        "base_image": {"name": "ubuntu-24.04"},
        "uploads": {},
        "network": {"name": "tenant", "floating-ip": true},
        "commands": ["touch /done"]
    }))
}

/// Uploads `app.conf` from a scratch directory, then runs `make world`.
struct UploadingSpec {
    _dir: TempDir,
    spec: BuildSpec,
}

#[fixture]
fn uploading_spec() -> UploadingSpec {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.conf");
    std::fs::write(&path, "port = 80").expect("write upload");
    let local = path.to_str().expect("utf8 path").to_owned();
    let spec = spec_from(&json!({
        "name": "web-base",
        "description": "Web server base image",
        "user": "ubuntu",
        "instance_type": "DEV1-S",
        "base_image": {"local": "ubuntu-24.04"},
        "uploads": {local: "/etc/app/app.conf"},
        "commands": ["make world", "touch /done"]
    }));
    UploadingSpec { _dir: dir, spec }
}

fn assert_nothing_left(harness: &Harness) {
    let live = harness.provider.live_resources();
    assert!(live.is_empty(), "leaked resources: {live:?}");
    assert_eq!(harness.work_areas_left(), 0, "work area left behind");
}

#[rstest]
#[tokio::test]
async fn successful_build_walks_every_state_and_cleans_up(#[from(happy)] harness: Harness, spec: BuildSpec) {
    let mut builder = harness.builder(fast_policy());

    let image = builder.bake(&spec).await.expect("build succeeds");

    assert_eq!(image.name, "web-base");
    assert_eq!(
        builder.history(),
        [
            BuildState::Created,
            BuildState::Acquired,
            BuildState::Launched,
            BuildState::Reachable,
            BuildState::Configured,
            BuildState::Imaged,
            BuildState::Closed,
        ]
    );
    assert!(builder.teardown_report().is_clean());
    assert_eq!(
        builder.teardown_report().steps(),
        [
            TeardownStep::CloseSession,
            TeardownStep::TerminateInstance,
            TeardownStep::DeleteAccessRule,
            TeardownStep::DeleteCredential,
            TeardownStep::RemoveKeyFiles,
            TeardownStep::RemoveWorkArea,
        ]
    );
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn failing_command_is_recorded_and_build_continues(harness: Harness, spec: BuildSpec) {
    harness.runner.push_success(); // connect
    harness.runner.push_exit_code(0);
    harness.runner.push_output(Some(1), "", "false: failed");
    harness.runner.push_exit_code(0);
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    let codes: Vec<_> = builder
        .command_results()
        .iter()
        .map(|record| record.exit_code)
        .collect();
    assert_eq!(codes, [Some(0), Some(1), Some(0)]);
    assert!(!builder.command_results().iter().all(CommandRecord::succeeded));
}

#[rstest]
#[case::credential(FakeOp::CreateCredential, BuildState::Created)]
#[case::access_rule(FakeOp::CreateAccessRule, BuildState::Created)]
#[case::launch(FakeOp::Launch, BuildState::Acquired)]
#[case::status(FakeOp::PollStatus, BuildState::Acquired)]
#[case::public_address(FakeOp::AttachPublicAddress, BuildState::Acquired)]
#[case::snapshot(FakeOp::Snapshot, BuildState::Configured)]
#[case::image_status(FakeOp::ImageStatus, BuildState::Configured)]
#[tokio::test]
async fn provider_failure_tears_down_everything(
    #[from(happy)] harness: Harness,
    spec: BuildSpec,
    #[case] op: FakeOp,
    #[case] last_good: BuildState,
) {
    harness.provider.fail(op, ProviderErrorKind::Other);
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(
        matches!(err, BuildError::Provider { .. }),
        "unexpected error: {err}"
    );
    let history = builder.history();
    assert_eq!(
        history.iter().rev().take(3).rev().copied().collect::<Vec<_>>(),
        [last_good, BuildState::Failed, BuildState::Closed]
    );
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn name_collision_is_reported_as_acquire_failure(harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .fail(FakeOp::CreateCredential, ProviderErrorKind::Collision);
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::QuotaOrCollision(_)), "{err}");
    assert_eq!(harness.provider.call_count(FakeOp::Launch), 0);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn rejected_spec_creates_nothing(harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .fail(FakeOp::CheckSpec, ProviderErrorKind::Other);
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::Config(_)), "{err}");
    assert_eq!(harness.provider.calls(), [FakeOp::CheckSpec]);
    assert!(harness.runner.invocations().is_empty());
    assert!(builder.teardown_report().entries.is_empty());
}

#[rstest]
#[tokio::test]
async fn unreachable_guest_exhausts_attempts(harness: Harness, spec: BuildSpec) {
    for _ in 0..3 {
        harness
            .runner
            .push_output(Some(255), "", "ssh: connect to host 192.0.2.10 port 22: Connection refused");
    }
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    match err {
        BuildError::UnreachableTimeout {
            attempts,
            last_reason,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_reason.contains("Connection refused"), "{last_reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(builder.connect_attempts(), 3);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn guest_reachable_on_last_attempt(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness.provider.script_addresses(&[InstanceAddresses::default()]);
    harness
        .runner
        .push_output(Some(255), "", "kex_exchange_identification: read: Connection reset by peer");
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    assert_eq!(builder.connect_attempts(), 3);
}

#[rstest]
#[tokio::test]
async fn rejected_key_fails_without_retrying(harness: Harness, spec: BuildSpec) {
    harness.runner.push_output(
        Some(255),
        "",
        "Load key \"/tmp/ofen-key-test01.pem\": invalid format",
    );
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::Auth(_)), "{err}");
    assert_eq!(builder.connect_attempts(), 1);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn instance_that_fails_to_boot_is_terminated(harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .script_instance_statuses(&[InstanceStatus::Pending, InstanceStatus::Failed]);
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(
        matches!(
            err,
            BuildError::LaunchFailed {
                status: InstanceStatus::Failed,
                ..
            }
        ),
        "{err}"
    );
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn image_polling_waits_until_available(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .script_image_statuses(&[ImageStatus::Pending, ImageStatus::Pending]);
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    assert_eq!(harness.provider.call_count(FakeOp::ImageStatus), 3);
}

#[rstest]
#[tokio::test]
async fn failed_image_is_an_error(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .script_image_statuses(&[ImageStatus::Pending, ImageStatus::Failed]);
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::ImageFailed { .. }), "{err}");
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn pre_image_commands_run_before_snapshot(#[from(happy)] mut harness: Harness, spec: BuildSpec) {
    harness.provider = harness
        .provider
        .clone()
        .with_pre_image_commands(&["sudo cloud-init clean"]);
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    let last_remote = harness
        .runner
        .invocations()
        .into_iter()
        .rev()
        .find(|invocation| invocation.program == "ssh")
        .expect("ssh invocations");
    assert!(
        last_remote.command_string().ends_with("sudo cloud-init clean"),
        "{}",
        last_remote.command_string()
    );
}

#[rstest]
#[tokio::test]
async fn launch_deadline_recovers_instance_by_credential(harness: Harness, spec: BuildSpec) {
    harness.provider.hang(FakeOp::Launch);
    let policy = BuildPolicy {
        launch_timeout: Duration::from_millis(20),
        ..fast_policy()
    };
    let mut builder = harness.builder(policy);

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::LaunchTimeout { .. }), "{err}");
    assert!(
        builder
            .teardown_report()
            .steps()
            .contains(&TeardownStep::RecoverLostInstance)
    );
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn lost_launch_result_is_recovered_by_credential(harness: Harness, spec: BuildSpec) {
    harness.provider.lose_launch_result();
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::Provider { .. }), "{err}");
    assert_eq!(harness.provider.call_count(FakeOp::FindInstances), 1);
    assert_eq!(harness.provider.call_count(FakeOp::Terminate), 1);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn interrupt_abandons_phase_and_tears_down(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness.provider.hang(FakeOp::ImageStatus);
    let mut builder = harness.builder(fast_policy());

    let err = builder
        .bake_until(&spec, tokio::time::sleep(Duration::from_millis(50)))
        .await
        .expect_err("build is interrupted");

    assert!(matches!(err, BuildError::Interrupted), "{err}");
    assert_eq!(builder.state(), BuildState::Closed);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn missing_resource_during_teardown_counts_as_released(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .fail(FakeOp::DeleteAccessRule, ProviderErrorKind::NotFound);
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    assert!(builder.teardown_report().is_clean());
}

#[rstest]
#[tokio::test]
async fn teardown_failure_does_not_stop_later_steps(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness
        .provider
        .fail(FakeOp::DeleteAccessRule, ProviderErrorKind::Other);
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build still produces an image");

    let report = builder.teardown_report();
    assert!(!report.is_clean());
    assert_eq!(report.failures().len(), 1);
    assert_eq!(
        report.failures().first().map(|(step, _)| *step),
        Some(TeardownStep::DeleteAccessRule)
    );
    let live = harness.provider.live_resources();
    assert!(live.credentials.is_empty());
    assert!(live.instances.is_empty());
    assert_eq!(live.access_rules.len(), 1);
}

#[rstest]
#[tokio::test]
async fn builder_runs_only_once(#[from(happy)] harness: Harness, spec: BuildSpec) {
    let mut builder = harness.builder(fast_policy());
    builder.bake(&spec).await.expect("first build succeeds");

    let err = builder.bake(&spec).await.expect_err("second build refused");

    assert!(matches!(err, BuildError::AlreadyUsed), "{err}");
}

#[rstest]
#[tokio::test]
async fn failed_upload_tears_down_everything(harness: Harness, uploading_spec: UploadingSpec) {
    harness.runner.push_success(); // connect
    harness.runner.push_success(); // mkdir
    harness
        .runner
        .push_output(Some(1), "", "scp: /etc/app/app.conf: Permission denied");
    let mut builder = harness.builder(fast_policy());

    let err = builder
        .bake(&uploading_spec.spec)
        .await
        .expect_err("build fails");

    assert!(
        matches!(err, BuildError::Upload(RemoteError::Transfer { .. })),
        "{err}"
    );
    assert!(builder.command_results().is_empty());
    assert_eq!(harness.provider.call_count(FakeOp::Snapshot), 0);
    assert_eq!(builder.state(), BuildState::Closed);
    assert_nothing_left(&harness);
}

#[rstest]
#[case::uploads("uploads", "app.conf")]
#[case::commands("commands", "make world")]
#[tokio::test]
async fn configure_deadline_tears_down_everything(
    uploading_spec: UploadingSpec,
    #[case] expected_stage: &str,
    #[case] slow_argument: &str,
) {
    let runner = ScriptedRunner::new()
        .with_keygen()
        .succeed_when_empty()
        .stalling_on(slow_argument, Duration::from_millis(300));
    let harness = harness_with(runner);
    let policy = BuildPolicy {
        upload_timeout: Duration::from_millis(30),
        command_timeout: Duration::from_millis(30),
        ..fast_policy()
    };
    let mut builder = harness.builder(policy);

    let err = builder
        .bake(&uploading_spec.spec)
        .await
        .expect_err("build fails");

    match err {
        BuildError::ConfigureTimeout { stage, timeout } => {
            assert_eq!(stage, expected_stage);
            assert_eq!(timeout, Duration::from_millis(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.provider.call_count(FakeOp::Snapshot), 0);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn image_stuck_pending_times_out(#[from(happy)] harness: Harness, spec: BuildSpec) {
    harness.provider.keep_images_pending();
    let policy = BuildPolicy {
        image_timeout: Duration::from_millis(50),
        ..fast_policy()
    };
    let mut builder = harness.builder(policy);

    let err = builder.bake(&spec).await.expect_err("build never succeeds");

    match err {
        BuildError::ImageTimeout { timeout } => {
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.provider.call_count(FakeOp::ImageStatus) > 1);
    assert!(!builder.history().contains(&BuildState::Imaged));
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn floating_address_is_used_for_ssh_and_released(
    #[from(happy)] harness: Harness,
    floating_spec: BuildSpec,
) {
    let mut builder = harness.builder(fast_policy());

    builder.bake(&floating_spec).await.expect("build succeeds");

    let first_ssh = harness
        .runner
        .invocations()
        .into_iter()
        .find(|invocation| invocation.program == "ssh")
        .expect("ssh invocation");
    let destination = format!("ubuntu@{FAKE_FLOATING_ADDRESS}");
    assert!(
        first_ssh.command_string().contains(&destination),
        "{}",
        first_ssh.command_string()
    );
    assert_eq!(
        builder.teardown_report().steps(),
        [
            TeardownStep::CloseSession,
            TeardownStep::TerminateInstance,
            TeardownStep::ReleasePublicAddress,
            TeardownStep::DeleteAccessRule,
            TeardownStep::DeleteCredential,
            TeardownStep::RemoveKeyFiles,
            TeardownStep::RemoveWorkArea,
        ]
    );
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn floating_address_is_released_when_guest_is_unreachable(
    harness: Harness,
    floating_spec: BuildSpec,
) {
    for _ in 0..3 {
        harness
            .runner
            .push_output(Some(255), "", "ssh: connect to host 198.51.100.7 port 22: No route to host");
    }
    let mut builder = harness.builder(fast_policy());

    let err = builder.bake(&floating_spec).await.expect_err("build fails");

    assert!(matches!(err, BuildError::UnreachableTimeout { .. }), "{err}");
    assert_eq!(harness.provider.call_count(FakeOp::ReleasePublicAddress), 1);
    assert_nothing_left(&harness);
}

#[rstest]
#[tokio::test]
async fn builds_without_floating_ip_allocate_nothing(#[from(happy)] harness: Harness, spec: BuildSpec) {
    let mut builder = harness.builder(fast_policy());

    builder.bake(&spec).await.expect("build succeeds");

    assert_eq!(harness.provider.call_count(FakeOp::ReleasePublicAddress), 0);
    assert!(
        !builder
            .teardown_report()
            .steps()
            .contains(&TeardownStep::ReleasePublicAddress)
    );
}
