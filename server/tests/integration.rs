// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end coverage over the actix-web surface: create a group, invite a
//! member, rotate its key epoch, then kick the member. Drives the same
//! `GroupController` wiring `main.rs` builds, through real HTTP requests
//! against an in-process `actix_web::test` service rather than a bound
//! socket.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use ed25519_dalek::{Signer, SigningKey};
use glkdc_backend::external::fakes::{AlwaysMutual, InMemoryAccountKeyProvider};
use glkdc_backend::fault_injector::NoopFaultInjector;
use glkdc_backend::group_controller::GroupController;
use glkdc_backend::key_epoch_coordinator::KeyEpochCoordinator;
use glkdc_backend::keys::cache::KeyCache;
use glkdc_backend::keys::memory::InMemoryKeyVersionStore;
use glkdc_backend::keys::KeyVersionStore;
use glkdc_backend::membership::memory::InMemoryMembershipStore;
use glkdc_backend::membership::MembershipStore;
use glkdc_backend::membership_fsm::MembershipFsm;
use glkdc_backend::pubsub::memory::InMemoryPubSubBus;
use glkdc_backend::pubsub::PubSubBus;
use glkdc_backend::rate_limiter::registry::LimiterRegistry;
use glkdc_backend::settings::{GroupPolicySettings, RateLimitSettings};
use glkdc_common::crypto::signatures::{Signature, VerifyingKey};
use glkdc_common::identifiers::Uid;
use glkdc_server::auth::fakes::HeaderTrustingCaller;
use glkdc_server::auth::AuthenticatedCaller;
use glkdc_server::handlers::{self, AppState};
use rand::rngs::OsRng;
use sqlx::PgPool;

fn policy() -> GroupPolicySettings {
    GroupPolicySettings {
        power_group_min: 200,
        power_group_max: 220,
        normal_group_refresh_keys_max: 240,
        key_switch_candidate_count: 5,
        qr_code_pending_ttl_seconds: 60,
        key_cache_ttl_seconds: 600,
        group_keys_versions_limit: 10,
        latest_group_keys_gids_limit: 5,
        fire_group_keys_update_gids_limit: 10,
        members_query_uids_limit: 500,
        privileged_principals: vec![],
    }
}

struct SignedIdentity {
    uid: Uid,
    key: SigningKey,
}

fn new_identity() -> SignedIdentity {
    let key = SigningKey::generate(&mut OsRng);
    let uid = Uid::from_public_key(key.verifying_key().as_bytes());
    SignedIdentity { uid, key }
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn create_invite_rotate_kick(pool: PgPool) -> sqlx::Result<()> {
    let owner = new_identity();
    let member = new_identity();

    let mut account_keys = InMemoryAccountKeyProvider::default();
    for identity in [&owner, &member] {
        account_keys.identity_keys.insert(
            identity.uid.clone(),
            VerifyingKey::from_bytes(&identity.key.verifying_key().to_bytes()).unwrap(),
        );
    }
    let account_keys: Arc<dyn glkdc_backend::external::AccountKeyProvider> = Arc::new(account_keys);

    let membership: Arc<dyn MembershipStore> = Arc::new(InMemoryMembershipStore::new());
    let keys: Arc<dyn KeyVersionStore> = Arc::new(InMemoryKeyVersionStore::new());
    let pubsub: Arc<dyn PubSubBus> = Arc::new(InMemoryPubSubBus::new());
    let limiters = Arc::new(LimiterRegistry::new(pool, &RateLimitSettings::default()));

    let key_epoch = Arc::new(KeyEpochCoordinator::new(
        membership.clone(),
        keys.clone(),
        KeyCache::new(chrono::Duration::seconds(600)),
        pubsub.clone(),
        account_keys.clone(),
        policy(),
        Arc::new(NoopFaultInjector),
    ));
    let fsm = Arc::new(MembershipFsm::new(
        membership.clone(),
        keys,
        pubsub,
        key_epoch.clone(),
        limiters.clone(),
        account_keys.clone(),
        Arc::new(AlwaysMutual),
        policy(),
    ));
    let controller = Arc::new(GroupController::new(
        membership,
        account_keys,
        limiters,
        fsm,
        key_epoch,
        policy(),
    ));

    let app_state = web::Data::new(AppState {
        controller,
        request_deadline: Duration::from_secs(180),
    });
    let authenticator: Arc<dyn AuthenticatedCaller> = Arc::new(HeaderTrustingCaller);
    let authenticator_data: web::Data<dyn AuthenticatedCaller> = web::Data::from(authenticator);

    let app = test::init_service(
        App::new()
            .app_data(app_state)
            .app_data(authenticator_data)
            .route("/v3/group/create", web::put().to(handlers::create_group))
            .route("/v3/group/invite", web::put().to(handlers::invite))
            .route("/v3/group/members", web::post().to(handlers::members))
            .route(
                "/v3/group/prepare_key_update",
                web::post().to(handlers::prepare_key_update),
            )
            .route("/v3/group/kick", web::put().to(handlers::kick)),
    )
    .await;

    let qr_code_setting = b"share-token".to_vec();
    let share_signature =
        Signature::from_bytes(&owner.key.sign(&qr_code_setting).to_bytes()).unwrap();
    let mut concatenated = qr_code_setting.clone();
    concatenated.push(0u8);
    let share_and_owner_confirm_signature =
        Signature::from_bytes(&owner.key.sign(&concatenated).to_bytes()).unwrap();

    let create_body = serde_json::json!({
        "name": base64_of(b"test group"),
        "ownerConfirm": false,
        "qrCodeSetting": base64_of(&qr_code_setting),
        "shareSignature": share_signature,
        "shareAndOwnerConfirmSignature": share_and_owner_confirm_signature,
        "encryptedGroupInfoSecret": base64_of(b"secret"),
        "encryptedEphemeralKey": base64_of(b"ephemeral"),
        "members": [member.uid.as_str()],
        "memberGroupInfoSecrets": [base64_of(b"member-secret")],
        "memberProofs": [base64_of(b"")],
        "groupKeysMode": "OneForEach",
        "groupKeys": { "keys_v0": [] },
    });

    let req = test::TestRequest::put()
        .uri("/v3/group/create")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&create_body)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let gid = resp["gid"].as_u64().expect("create response carries a gid");

    let invite_body = serde_json::json!({
        "gid": gid,
        "members": [member.uid.as_str()],
        "memberGroupInfoSecrets": [base64_of(b"member-secret")],
    });
    let req = test::TestRequest::put()
        .uri("/v3/group/invite")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&invite_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let members_body = serde_json::json!({ "gid": gid, "uids": [member.uid.as_str()] });
    let req = test::TestRequest::post()
        .uri("/v3/group/members")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&members_body)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["members"].as_array().unwrap().len(), 1);

    let prepare_body = serde_json::json!({ "gid": gid, "version": 0, "mode": "OneForEach" });
    let req = test::TestRequest::post()
        .uri("/v3/group/prepare_key_update")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&prepare_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let kick_body = serde_json::json!({ "gid": gid, "members": [member.uid.as_str()] });
    let req = test::TestRequest::put()
        .uri("/v3/group/kick")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&kick_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post()
        .uri("/v3/group/members")
        .insert_header(("x-glkdc-uid", owner.uid.as_str()))
        .set_json(&members_body)
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["members"].as_array().unwrap().len(), 0);

    Ok(())
}

#[actix_web::test]
async fn missing_auth_header_is_rejected_before_the_controller_runs() {
    // No controller call should happen before authentication, so a bare
    // `HeaderTrustingCaller` with no header is enough to exercise this path.
    let membership: Arc<dyn MembershipStore> = Arc::new(InMemoryMembershipStore::new());
    let keys: Arc<dyn KeyVersionStore> = Arc::new(InMemoryKeyVersionStore::new());
    let pubsub: Arc<dyn PubSubBus> = Arc::new(InMemoryPubSubBus::new());
    let account_keys: Arc<dyn glkdc_backend::external::AccountKeyProvider> =
        Arc::new(InMemoryAccountKeyProvider::default());
    let limiters = Arc::new(LimiterRegistry::new(
        PgPool::connect_lazy("postgres://localhost/does-not-matter").unwrap(),
        &RateLimitSettings::default(),
    ));
    let key_epoch = Arc::new(KeyEpochCoordinator::new(
        membership.clone(),
        keys.clone(),
        KeyCache::new(chrono::Duration::seconds(600)),
        pubsub.clone(),
        account_keys.clone(),
        policy(),
        Arc::new(NoopFaultInjector),
    ));
    let fsm = Arc::new(MembershipFsm::new(
        membership.clone(),
        keys,
        pubsub,
        key_epoch.clone(),
        limiters.clone(),
        account_keys.clone(),
        Arc::new(AlwaysMutual),
        policy(),
    ));
    let controller = Arc::new(GroupController::new(
        membership,
        account_keys,
        limiters,
        fsm,
        key_epoch,
        policy(),
    ));
    let app_state = web::Data::new(AppState {
        controller,
        request_deadline: Duration::from_secs(180),
    });
    let authenticator: Arc<dyn AuthenticatedCaller> = Arc::new(HeaderTrustingCaller);
    let authenticator_data: web::Data<dyn AuthenticatedCaller> = web::Data::from(authenticator);

    let app = test::init_service(
        App::new()
            .app_data(app_state)
            .app_data(authenticator_data)
            .route("/v3/group/members", web::post().to(handlers::members)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/v3/group/members")
        .set_json(&serde_json::json!({ "gid": 1, "uids": [] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

fn base64_of(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}
