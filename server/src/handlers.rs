// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One `actix-web` handler per JSON endpoint, translating JSON bodies into
//! `GroupController` calls and domain responses back into wire DTOs.
//! Handlers hold no state of their own — everything comes from [`AppState`]
//! via `web::Data`.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use glkdc_backend::group_controller::GroupController;

use crate::auth::CallerIdentity;
use crate::deadline;
use crate::dto::*;
use crate::errors::ApiError;

pub struct AppState {
    pub controller: Arc<GroupController>,
    pub request_deadline: Duration,
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}

pub async fn create_group(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<CreateGroupRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner().into();
    let response = deadline::enforce(
        state.request_deadline,
        state.controller.create_group(&caller.uid, req),
    )
    .await?;
    Ok(HttpResponse::Ok().json(CreateGroupResponseDto::from(response)))
}

pub async fn update_group(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<UpdateGroupRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let gid = gid(dto.gid);
    let req = dto.into();
    let group = deadline::enforce(
        state.request_deadline,
        state.controller.update_group(&caller.uid, gid, req),
    )
    .await?;
    Ok(HttpResponse::Ok().json(GroupDto::from(group)))
}

pub async fn invite(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<InviteRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let req = dto.into();
    deadline::enforce(
        state.request_deadline,
        state.controller.invite(&caller.uid, target, req),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn join_group_by_code(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<JoinByCodeRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let req = dto.into();
    let outcome = deadline::enforce(
        state.request_deadline,
        state.controller.join_group_by_code(&caller.uid, target, req),
    )
    .await?;
    Ok(HttpResponse::Ok().json(JoinByCodeResponseDto::from(outcome)))
}

pub async fn add_me(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<AddMeRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    deadline::enforce(
        state.request_deadline,
        state
            .controller
            .add_me(&caller.uid, target, dto.group_info_secret, dto.proof),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn review_join_request(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<ReviewJoinRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let reviews = dto.reviews.into_iter().map(Into::into).collect();
    deadline::enforce(
        state.request_deadline,
        state
            .controller
            .review_join_request(&caller.uid, target, reviews),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn kick(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<KickRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    deadline::enforce(
        state.request_deadline,
        state.controller.kick(&caller.uid, target, dto.members),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn leave(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<LeaveRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    deadline::enforce(
        state.request_deadline,
        state.controller.leave(&caller.uid, target, dto.next_owner),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn members(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<MembersRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let response = deadline::enforce(
        state.request_deadline,
        state.controller.members(&caller.uid, target, dto.uids),
    )
    .await?;
    Ok(HttpResponse::Ok().json(MembersResponseDto::from(response)))
}

pub async fn group_keys(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<GroupKeysRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let response = deadline::enforce(
        state.request_deadline,
        state.controller.group_keys(&caller.uid, target, dto.versions),
    )
    .await?;
    Ok(HttpResponse::Ok().json(GroupKeysResponseDto::from(response)))
}

pub async fn latest_group_keys(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<LatestGroupKeysRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let gids = dto.gids.into_iter().map(gid).collect();
    let response = deadline::enforce(
        state.request_deadline,
        state.controller.latest_group_keys(&caller.uid, gids),
    )
    .await?;
    Ok(HttpResponse::Ok().json(LatestGroupKeysResponseDto::from(response)))
}

pub async fn fire_group_keys_update(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<FireGroupKeysUpdateRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let gids = dto.gids.into_iter().map(gid).collect();
    deadline::enforce(
        state.request_deadline,
        state.controller.fire_group_keys_update(&caller.uid, gids),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn group_keys_update(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<GroupKeysUpdateRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    deadline::enforce(
        state.request_deadline,
        state.controller.group_keys_update(
            &caller.uid,
            target,
            dto.version,
            dto.group_keys_mode,
            dto.encrypt_version,
            dto.group_keys,
        ),
    )
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn prepare_key_update(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<PrepareKeyUpdateRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let target = gid(dto.gid);
    let response = deadline::enforce(
        state.request_deadline,
        state
            .controller
            .prepare_key_update(&caller.uid, target, dto.version, dto.mode),
    )
    .await?;
    Ok(HttpResponse::Ok().json(PrepareKeyUpdateResponseDto::from(response)))
}

pub async fn dh_keys(
    state: web::Data<AppState>,
    caller: CallerIdentity,
    body: web::Json<DhKeysRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let response = deadline::enforce(
        state.request_deadline,
        state.controller.dh_keys(&caller.uid, dto.uids),
    )
    .await?;
    Ok(HttpResponse::Ok().json(DhKeysResponseDto::from(response)))
}
