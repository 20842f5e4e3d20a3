//! Full lifecycle: deploy, redeploy, tear down, against a persisted
//! control plane, the way the CLI drives it across process invocations.

use petstore_stack::cloud::local::LocalControlPlane;
use petstore_stack::manifest::{keys, Manifest};
use petstore_stack::teardown::{TeardownOutcome, CONFIRM_TOKEN};
use petstore_stack::testing::{test_config, TEST_ACCOUNT_ID, TEST_REGION};
use petstore_stack::wait::PollPolicy;
use petstore_stack::{stack, Decommissioner, Provisioner};

#[tokio::test]
async fn deploy_redeploy_teardown_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let state_path = dir.path().join("control-plane.json");
    let registry = stack::registry_with_poll(PollPolicy::immediate(20)).unwrap();

    // Deploy.
    let manifest = {
        let cloud = LocalControlPlane::load(&state_path, TEST_ACCOUNT_ID, TEST_REGION).unwrap();
        let report = Provisioner::new(&cloud, &config).run(&registry).await.unwrap();
        assert!(report.all_created());
        report.manifest.save(&config.manifest_path).unwrap();
        report.manifest
    };
    assert!(state_path.exists(), "control-plane state must persist");

    // Redeploy from a fresh control-plane handle, as a second process would.
    {
        let cloud = LocalControlPlane::load(&state_path, TEST_ACCOUNT_ID, TEST_REGION).unwrap();
        let report = Provisioner::new(&cloud, &config).run(&registry).await.unwrap();
        assert!(report.all_already_existed());
        assert_eq!(report.manifest, manifest);
    }

    // The manifest round-trips through disk unchanged.
    let loaded = Manifest::load(&config.manifest_path).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.require(keys::REGION).unwrap(), TEST_REGION);

    // Tear down, again from a fresh handle.
    {
        let cloud = LocalControlPlane::load(&state_path, TEST_ACCOUNT_ID, TEST_REGION).unwrap();
        let report = Decommissioner::new(&cloud, &config)
            .run(&registry, &loaded, CONFIRM_TOKEN)
            .await;
        assert!(report.is_fully_clean());
        assert!(report
            .steps
            .iter()
            .all(|(_, outcome)| *outcome == TeardownOutcome::Deleted));
        assert_eq!(cloud.total_resources().await, 0);
    }
    assert!(!config.manifest_path.exists());

    // A third process sees nothing left.
    let cloud = LocalControlPlane::load(&state_path, TEST_ACCOUNT_ID, TEST_REGION).unwrap();
    assert_eq!(cloud.total_resources().await, 0);
}

#[tokio::test]
async fn failed_deploy_leaves_partial_state_that_teardown_cleans() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let registry = stack::registry_with_poll(PollPolicy::immediate(5)).unwrap();
    let cloud = LocalControlPlane::in_memory(TEST_ACCOUNT_ID, TEST_REGION).with_failing_gateways();

    // The gateway step fails; everything before it was created.
    let err = Provisioner::new(&cloud, &config)
        .run(&registry)
        .await
        .unwrap_err();
    assert_eq!(err.step, "gateway");
    let resources = cloud.total_resources().await;
    assert!(resources > 0, "earlier steps must have provisioned");

    // Teardown with a manifest rebuilt from the fixed well-known names still
    // removes what exists. The gateway id is known (deterministic), the
    // target was never created.
    let mut manifest = Manifest::new();
    manifest.insert(keys::REGION, TEST_REGION);
    manifest.insert(keys::ACCOUNT_ID, TEST_ACCOUNT_ID);
    manifest.insert(
        keys::FUNCTION_ROLE_ARN,
        config.role_arn(petstore_stack::config::FUNCTION_ROLE_NAME),
    );
    manifest.insert(
        keys::FUNCTION_ARN,
        config.function_arn(petstore_stack::config::FUNCTION_NAME),
    );
    manifest.insert(keys::FUNCTION_NAME, petstore_stack::config::FUNCTION_NAME);

    let report = Decommissioner::new(&cloud, &config)
        .run(&registry, &manifest, CONFIRM_TOKEN)
        .await;

    assert!(report.is_fully_clean());
    assert_eq!(
        report.outcome_for("function"),
        Some(&TeardownOutcome::Deleted)
    );
    assert_eq!(
        report.outcome_for("gateway-target"),
        Some(&TeardownOutcome::Skipped)
    );
}
