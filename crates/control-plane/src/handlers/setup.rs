use axum::{extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiResult;
use crate::AppState;

use super::{validate_account_id, validate_region};

#[derive(Serialize, ToSchema)]
pub struct InitResponse {
    pub tenant_id: String,
    pub default_region: String,
    pub role_name: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

/// Installation identity plus connection status. When a default target
/// account is configured, a live exchange decides `connected`; the returned
/// credentials are discarded on the spot.
#[utoipa::path(get, path = "/init", responses( (status = 200, body = InitResponse) ))]
#[tracing::instrument(level = "info", skip(state))]
pub async fn init(State(state): State<AppState>) -> Json<InitResponse> {
    let account_id = state.settings.default_account_id.clone();
    let mut connected = false;
    let mut connection_error = None;
    if let Some(account) = &account_id {
        match state
            .broker
            .assume(
                account,
                &state.settings.default_region,
                &state.settings.deploy_role_name,
                &state.tenant.external_id,
                "vela-init-probe",
            )
            .await
        {
            Ok(_) => connected = true,
            Err(err) => connection_error = Some(err.to_string()),
        }
    }
    Json(InitResponse {
        tenant_id: state.tenant.tenant_id.clone(),
        default_region: state.settings.default_region.clone(),
        role_name: state.settings.deploy_role_name.clone(),
        connected,
        account_id,
        connection_error,
    })
}

#[derive(Deserialize, ToSchema)]
pub struct ConnectUrlQuery { pub region: Option<String> }

#[derive(Serialize, ToSchema)]
pub struct ConnectUrlResponse { pub url: String, pub role_name: String }

/// One-click trust-setup link: a CloudFormation quick-create URL that
/// provisions the deploy role bound to this tenant's external id. The only
/// place the external id leaves the process besides the exchange itself.
#[utoipa::path(get, path = "/connect-url",
    params( ("region" = Option<String>, Query, description = "Target region, defaults to the configured one") ),
    responses( (status = 200, body = ConnectUrlResponse), (status = 400, description = "invalid region") ))]
pub async fn connect_url(State(state): State<AppState>, Query(q): Query<ConnectUrlQuery>) -> ApiResult<Json<ConnectUrlResponse>> {
    let region = q.region.unwrap_or_else(|| state.settings.default_region.clone());
    validate_region(&region)?;
    let url = format!(
        "https://{region}.console.aws.amazon.com/cloudformation/home?region={region}#/stacks/quickcreate?stackName=vela-connect&templateURL={template}&param_RoleName={role}&param_ExternalId={external}",
        template = state.settings.connect_template_url,
        role = state.settings.deploy_role_name,
        external = state.tenant.external_id,
    );
    Ok(Json(ConnectUrlResponse { url, role_name: state.settings.deploy_role_name.clone() }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckRequest { pub account_id: String, pub region: String }

#[derive(Serialize, ToSchema)]
pub struct CheckResponse { pub ok: bool, pub role_arn: String }

/// Attempt one credential exchange against the caller's account and report
/// whether the trust relationship works.
#[utoipa::path(post, path = "/check", request_body = CheckRequest,
    responses( (status = 200, body = CheckResponse), (status = 401, description = "trust not established") ))]
#[tracing::instrument(level = "info", skip(state, req), fields(account = %req.account_id, region = %req.region))]
pub async fn check(State(state): State<AppState>, Json(req): Json<CheckRequest>) -> ApiResult<Json<CheckResponse>> {
    validate_account_id(&req.account_id)?;
    validate_region(&req.region)?;
    let role_arn = format!("arn:aws:iam::{}:role/{}", req.account_id, state.settings.deploy_role_name);
    state
        .broker
        .assume(
            &req.account_id,
            &req.region,
            &state.settings.deploy_role_name,
            &state.tenant.external_id,
            "vela-connection-check",
        )
        .await?;
    Ok(Json(CheckResponse { ok: true, role_arn }))
}
