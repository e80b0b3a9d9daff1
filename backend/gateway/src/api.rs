//! Axum REST API handlers.
//!
//! Reads go through the [`Aggregator`], writes through the [`Session`] of the
//! configured account. Every handler returns `Result<_, ApiError>` so that
//! errors share one JSON shape and status mapping.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::error;

use crate::activity::{ActivityRecord, EntityType};
use crate::aggregator::{Aggregator, CampaignDetail, CampaignView, LoanView, Portfolio};
use crate::db;
use crate::errors::GatewayError;
use crate::ipfs::{IpfsBridge, UploadFile};
use crate::models::{CampaignId, Document, LoanId, Milestone};
use crate::session::{DocumentUpload, FundingReceipt, NewCampaign, NewLoan, Session, Submitted};

pub struct ApiState {
    pub aggregator: Aggregator,
    pub session: Session,
    pub ipfs: Arc<IpfsBridge>,
    pub pool: SqlitePool,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/campaigns/:id", get(get_campaign))
        .route(
            "/campaigns/:id/documents",
            get(campaign_documents).post(upload_campaign_document),
        )
        .route(
            "/campaigns/:id/milestones",
            get(campaign_milestones).post(create_milestone),
        )
        .route(
            "/campaigns/:id/milestones/:mid/complete",
            post(complete_milestone),
        )
        .route("/campaigns/:id/activity", get(campaign_activity))
        .route("/campaigns/:id/fund", post(fund_campaign))
        .route("/campaigns/:id/withdraw", post(withdraw_campaign_funds))
        .route("/campaigns/:id/verify", post(verify_campaign))
        .route("/campaigns/:id/refund", post(refund_investment))
        .route("/loans", get(list_loans).post(request_loan))
        .route("/loans/:id", get(get_loan))
        .route(
            "/loans/:id/documents",
            get(loan_documents).post(upload_loan_document),
        )
        .route("/loans/:id/lend", post(lend))
        .route("/loans/:id/withdraw", post(withdraw_loan_funds))
        .route("/loans/:id/repay", post(repay_loan))
        .route("/investors/:address/portfolio", get(portfolio))
        .route("/activity", get(all_activity))
        .route("/ipfs/files", post(pin_files))
        .route("/ipfs/json", post(pin_json))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidAmount(_)
            | GatewayError::NotConnected
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Reverted(_) | GatewayError::OrphanedUpload { .. } => StatusCode::CONFLICT,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Rpc(_)
            | GatewayError::Http(_)
            | GatewayError::Abi(_)
            | GatewayError::UploadFailed(_)
            | GatewayError::Metadata(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(GatewayError::BadRequest(msg.into()))
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| bad_request(format!("invalid address: {raw}")))
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ViewerQuery {
    pub viewer: Option<String>,
}

impl ViewerQuery {
    fn viewer(&self) -> Result<Option<Address>, ApiError> {
        self.viewer
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(parse_address)
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountBody {
    /// Display units, e.g. `"1.5"`.
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub fund_amount: String,
}

#[derive(Serialize)]
pub struct Listing<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub account: Option<Address>,
}

#[derive(Debug, Serialize)]
pub struct Pinned {
    pub cid: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Files and text fields of a multipart body.
struct UploadForm {
    files: Vec<UploadFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut files = Vec::new();
        let mut fields = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                    files.push(UploadFile {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
                    fields.insert(name, text);
                }
            }
        }

        Ok(Self { files, fields })
    }

    fn single_file(&mut self) -> Result<UploadFile, ApiError> {
        match self.files.len() {
            1 => Ok(self.files.remove(0)),
            0 => Err(bad_request("no file in upload")),
            n => Err(bad_request(format!("expected one file, got {n}"))),
        }
    }

    fn document_type(&self) -> String {
        self.fields
            .get("document_type")
            .or_else(|| self.fields.get("documentType"))
            .cloned()
            .unwrap_or_else(|| "other".to_string())
    }
}

// ─────────────────────────────────────────────────────────
// Handlers: reads
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        account: state.session.account(),
    })
}

/// `GET /campaigns?viewer=`
pub async fn list_campaigns(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ViewerQuery>,
) -> ApiResult<Listing<CampaignView>> {
    let views = state.aggregator.campaign_views(query.viewer()?).await?;
    Ok(Json(views.into()))
}

/// `GET /campaigns/:id?viewer=`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Query(query): Query<ViewerQuery>,
) -> ApiResult<CampaignDetail> {
    let detail = state
        .aggregator
        .campaign_detail(CampaignId(id), query.viewer()?)
        .await?;
    Ok(Json(detail))
}

/// `GET /campaigns/:id/documents`
pub async fn campaign_documents(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Listing<Document>> {
    let docs = state.aggregator.campaign_documents(CampaignId(id)).await?;
    Ok(Json(docs.into()))
}

/// `GET /campaigns/:id/milestones`
pub async fn campaign_milestones(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Listing<Milestone>> {
    let milestones = state.aggregator.campaign_milestones(CampaignId(id)).await?;
    Ok(Json(milestones.into()))
}

/// `GET /campaigns/:id/activity`
pub async fn campaign_activity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Listing<ActivityRecord>> {
    let rows = db::get_activity_for(&state.pool, EntityType::Campaign, id).await?;
    Ok(Json(rows.into()))
}

/// `GET /loans?viewer=`
pub async fn list_loans(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ViewerQuery>,
) -> ApiResult<Listing<LoanView>> {
    let views = state.aggregator.loan_views(query.viewer()?).await?;
    Ok(Json(views.into()))
}

/// `GET /loans/:id?viewer=`
pub async fn get_loan(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Query(query): Query<ViewerQuery>,
) -> ApiResult<LoanView> {
    let view = state.aggregator.loan_view(LoanId(id), query.viewer()?).await?;
    Ok(Json(view))
}

/// `GET /loans/:id/documents`
pub async fn loan_documents(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Listing<Document>> {
    let docs = state.aggregator.loan_documents(LoanId(id)).await?;
    Ok(Json(docs.into()))
}

/// `GET /investors/:address/portfolio`
pub async fn portfolio(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> ApiResult<Portfolio> {
    let owner = parse_address(&address)?;
    Ok(Json(state.aggregator.portfolio(owner).await?))
}

/// `GET /activity`
pub async fn all_activity(State(state): State<Arc<ApiState>>) -> ApiResult<Listing<ActivityRecord>> {
    let rows = db::get_all_activity(&state.pool).await?;
    Ok(Json(rows.into()))
}

// ─────────────────────────────────────────────────────────
// Handlers: campaign writes
// ─────────────────────────────────────────────────────────

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let submitted = state.session.create_campaign(body).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// `POST /campaigns/:id/fund`
pub async fn fund_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(body): Json<AmountBody>,
) -> ApiResult<FundingReceipt> {
    let receipt = state
        .session
        .fund_campaign_and_refresh(CampaignId(id), &body.amount)
        .await?;
    Ok(Json(receipt))
}

/// `POST /campaigns/:id/withdraw`
pub async fn withdraw_campaign_funds(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.withdraw_campaign_funds(CampaignId(id)).await?))
}

/// `POST /campaigns/:id/verify`
pub async fn verify_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.verify_campaign(CampaignId(id)).await?))
}

/// `POST /campaigns/:id/refund`
pub async fn refund_investment(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.refund_investment(CampaignId(id)).await?))
}

/// `POST /campaigns/:id/milestones`
pub async fn create_milestone(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(body): Json<NewMilestone>,
) -> ApiResult<Submitted> {
    let submitted = state
        .session
        .create_milestone(CampaignId(id), body.title, body.description, &body.fund_amount)
        .await?;
    Ok(Json(submitted))
}

/// `POST /campaigns/:id/milestones/:mid/complete` (multipart proof file)
pub async fn complete_milestone(
    State(state): State<Arc<ApiState>>,
    Path((id, mid)): Path<(u64, u64)>,
    multipart: Multipart,
) -> ApiResult<DocumentUpload> {
    let proof = UploadForm::read(multipart).await?.single_file()?;
    let upload = state
        .session
        .complete_milestone(CampaignId(id), mid, proof)
        .await?;
    Ok(Json(upload))
}

/// `POST /campaigns/:id/documents` (multipart `file` + `document_type`)
pub async fn upload_campaign_document(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    multipart: Multipart,
) -> ApiResult<DocumentUpload> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.single_file()?;
    let upload = state
        .session
        .upload_campaign_document(CampaignId(id), file, &form.document_type())
        .await?;
    Ok(Json(upload))
}

// ─────────────────────────────────────────────────────────
// Handlers: loan writes
// ─────────────────────────────────────────────────────────

/// `POST /loans`
pub async fn request_loan(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NewLoan>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let submitted = state.session.request_loan(body).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// `POST /loans/:id/lend`
pub async fn lend(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(body): Json<AmountBody>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.lend(LoanId(id), &body.amount).await?))
}

/// `POST /loans/:id/withdraw`
pub async fn withdraw_loan_funds(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.withdraw_loan_funds(LoanId(id)).await?))
}

/// `POST /loans/:id/repay`
pub async fn repay_loan(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Submitted> {
    Ok(Json(state.session.repay_loan(LoanId(id)).await?))
}

/// `POST /loans/:id/documents` (multipart `file` + `document_type`)
pub async fn upload_loan_document(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    multipart: Multipart,
) -> ApiResult<DocumentUpload> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.single_file()?;
    let upload = state
        .session
        .upload_loan_document(LoanId(id), file, &form.document_type())
        .await?;
    Ok(Json(upload))
}

// ─────────────────────────────────────────────────────────
// Handlers: raw IPFS
// ─────────────────────────────────────────────────────────

/// `POST /ipfs/files` (multipart, any number of files)
pub async fn pin_files(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> ApiResult<Listing<Pinned>> {
    let form = UploadForm::read(multipart).await?;
    if form.files.is_empty() {
        return Err(bad_request("no file in upload"));
    }
    let names: Vec<String> = form.files.iter().map(|f| f.file_name.clone()).collect();
    let cids = state.ipfs.upload_many(form.files).await?;
    let pinned: Vec<Pinned> = cids
        .into_iter()
        .zip(names)
        .map(|(cid, name)| Pinned {
            url: state.ipfs.resolve(&cid, None),
            cid,
            file_name: Some(name),
        })
        .collect();
    Ok(Json(pinned.into()))
}

/// `POST /ipfs/json`
pub async fn pin_json(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<Value>,
) -> ApiResult<Pinned> {
    let cid = state.ipfs.upload_json(&body).await?;
    Ok(Json(Pinned {
        url: state.ipfs.resolve(&cid, None),
        cid,
        file_name: None,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::address;
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::chain::mock::MockChain;
    use crate::ipfs::MockPinner;
    use crate::session::SettlePolicy;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");

    async fn state(account: Option<Address>) -> Arc<ApiState> {
        let chain = Arc::new(MockChain::new(Address::ZERO, 43113));
        let ipfs = Arc::new(IpfsBridge::new(
            Arc::new(MockPinner::new()),
            "https://gateway.pinata.cloud/ipfs/",
            "https://ipfs.io/ipfs/",
        ));
        let aggregator = Aggregator::new(chain.clone(), ipfs.clone(), Duration::from_secs(30));
        let session = Session::new(
            chain,
            ipfs.clone(),
            aggregator.clone(),
            account,
            SettlePolicy::Delay(Duration::from_millis(1)),
        );
        Arc::new(ApiState {
            aggregator,
            session,
            ipfs,
            pool: db::init_pool("sqlite::memory:").await.unwrap(),
        })
    }

    fn new_campaign() -> NewCampaign {
        serde_json::from_value(json!({
            "title": "Acme",
            "description": "Rockets",
            "target": "100",
            "deadline": (Utc::now() + chrono::Duration::days(10)).to_rfc3339(),
        }))
        .unwrap()
    }

    #[test]
    fn error_status_mapping() {
        let status = |e| ApiError(e).into_response().status();
        assert_eq!(status(GatewayError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(GatewayError::NotConnected), StatusCode::BAD_REQUEST);
        assert_eq!(status(GatewayError::InvalidAmount("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(GatewayError::Reverted("x".into())), StatusCode::CONFLICT);
        assert_eq!(status(GatewayError::Timeout("x".into())), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status(GatewayError::UploadFailed("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(GatewayError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn viewer_query_parsing() {
        let empty = ViewerQuery { viewer: Some(String::new()) };
        assert_eq!(empty.viewer().unwrap(), None);
        let bad = ViewerQuery { viewer: Some("0x12".into()) };
        assert!(bad.viewer().is_err());
        let good = ViewerQuery {
            viewer: Some(OWNER.to_string()),
        };
        assert_eq!(good.viewer().unwrap(), Some(OWNER));
    }

    #[tokio::test]
    async fn create_then_list_and_fund() {
        let state = state(Some(OWNER)).await;
        let (status, Json(submitted)) = create_campaign(State(state.clone()), Json(new_campaign()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(submitted.assigned_id, Some(0));

        let Json(listing) = list_campaigns(
            State(state.clone()),
            Query(ViewerQuery {
                viewer: Some(OWNER.to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listing.count, 1);
        assert!(listing.items[0].is_owner);

        let Json(receipt) = fund_campaign(
            State(state.clone()),
            Path(0),
            Json(AmountBody {
                amount: "25".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(receipt.token_id, Some(1));

        let Json(detail) = get_campaign(State(state), Path(0), Query(ViewerQuery::default()))
            .await
            .unwrap();
        assert_eq!(detail.view.funding_progress, 25.0);
    }

    #[tokio::test]
    async fn unknown_campaign_is_404() {
        let state = state(None).await;
        let err = get_campaign(State(state), Path(3), Query(ViewerQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn writes_without_account_are_rejected() {
        let state = state(None).await;
        let err = create_campaign(State(state), Json(new_campaign()))
            .await
            .unwrap_err();
        assert!(matches!(err.0, GatewayError::NotConnected));
    }

    #[tokio::test]
    async fn pin_json_returns_gateway_url() {
        let state = state(None).await;
        let Json(pinned) = pin_json(State(state), Json(json!({ "name": "meta" })))
            .await
            .unwrap();
        assert_eq!(
            pinned.url,
            format!("https://gateway.pinata.cloud/ipfs/{}", pinned.cid)
        );
    }

    #[tokio::test]
    async fn portfolio_rejects_bad_address() {
        let state = state(None).await;
        let err = portfolio(State(state), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
