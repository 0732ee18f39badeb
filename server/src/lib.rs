// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP wire surface for the group lifecycle and key-distribution core.

pub mod auth;
pub mod configurations;
pub mod deadline;
pub mod dto;
pub mod errors;
pub mod handlers;
pub mod telemetry;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::web::{self, Data};
use actix_web::App;
use actix_web::HttpServer;
use glkdc_backend::group_controller::GroupController;
use tracing_actix_web::TracingLogger;

use crate::auth::AuthenticatedCaller;
use crate::handlers::{self, AppState};

pub fn run(
    listener: TcpListener,
    controller: Arc<GroupController>,
    authenticator: Arc<dyn AuthenticatedCaller>,
    request_deadline: Duration,
    max_body_bytes: usize,
) -> Result<Server, std::io::Error> {
    let app_state = Data::new(AppState {
        controller,
        request_deadline,
    });
    let authenticator_data: Data<dyn AuthenticatedCaller> = Data::from(authenticator);

    tracing::info!(
        address = %listener.local_addr().expect("listener has a local address"),
        "starting server",
    );

    let server = HttpServer::new(move || {
        let json_config = web::JsonConfig::default().limit(max_body_bytes);

        App::new()
            .wrap(TracingLogger::default())
            .app_data(app_state.clone())
            .app_data(authenticator_data.clone())
            .app_data(json_config)
            .route("/health_check", web::get().to(handlers::health_check))
            .route("/v3/group/create", web::put().to(handlers::create_group))
            .route("/v3/group/update", web::put().to(handlers::update_group))
            .route("/v3/group/invite", web::put().to(handlers::invite))
            .route(
                "/v3/group/join_group_by_code",
                web::put().to(handlers::join_group_by_code),
            )
            .route("/v3/group/add_me", web::put().to(handlers::add_me))
            .route(
                "/v3/group/review_join_request",
                web::put().to(handlers::review_join_request),
            )
            .route("/v3/group/kick", web::put().to(handlers::kick))
            .route("/v3/group/leave", web::put().to(handlers::leave))
            .route("/v3/group/members", web::post().to(handlers::members))
            .route(
                "/v3/group/group_keys",
                web::post().to(handlers::group_keys),
            )
            .route(
                "/v3/group/latest_group_keys",
                web::post().to(handlers::latest_group_keys),
            )
            .route(
                "/v3/group/fire_group_keys_update",
                web::post().to(handlers::fire_group_keys_update),
            )
            .route(
                "/v3/group/group_keys_update",
                web::put().to(handlers::group_keys_update),
            )
            .route(
                "/v3/group/prepare_key_update",
                web::post().to(handlers::prepare_key_update),
            )
            .route("/v3/group/dh_keys", web::post().to(handlers::dh_keys))
    })
    .listen(listener)?
    .run();
    Ok(server)
}
