//! HTTP surface. [`endpoints`] is the authoritative route table: `configure`
//! registers one resource per distinct path from it, and the write gate
//! looks up the capability of the matched entry.

use actix_web::body::BoxBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::{header, Method};
use actix_web::middleware::{from_fn, Next};
use actix_web::{web, HttpRequest, HttpResponse, Route};
use log::info;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::require_write;
use crate::error::Error;
use crate::intensity::Intensity;
use crate::models::{ReadingChanges, ReadingPayload, SegmentChanges, SegmentPayload};
use crate::store::{ReadingFilter, SegmentFilter, Store};
use crate::views::{ReadingView, SegmentDetail, SegmentSummary};

pub const SCHEMA_PATH: &str = "/api/schema/";
pub const DOCS_PATH: &str = "/api/docs/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
}

#[derive(Clone, Debug)]
pub struct Endpoint {
    pub method: Method,
    pub path: &'static str,
    pub capability: Capability,
    handler: fn(Route) -> Route,
}

impl Endpoint {
    fn new(method: Method, path: &'static str, capability: Capability, handler: fn(Route) -> Route) -> Endpoint {
        Endpoint {
            method,
            path,
            capability,
            handler,
        }
    }

    fn route(&self) -> Route {
        (self.handler)(web::route().method(self.method.clone()))
    }
}

pub fn endpoints() -> Vec<Endpoint> {
    use Capability::{Read, Write};
    vec![
        Endpoint::new(Method::GET, "/api/segments/", Read, |r| r.to(list_segments)),
        Endpoint::new(Method::POST, "/api/segments/", Write, |r| r.to(create_segment)),
        Endpoint::new(Method::GET, "/api/segments/{id}/", Read, |r| r.to(get_segment)),
        Endpoint::new(Method::PUT, "/api/segments/{id}/", Write, |r| r.to(update_segment)),
        Endpoint::new(Method::PATCH, "/api/segments/{id}/", Write, |r| r.to(partial_update_segment)),
        Endpoint::new(Method::DELETE, "/api/segments/{id}/", Write, |r| r.to(delete_segment)),
        Endpoint::new(Method::GET, "/api/readings/", Read, |r| r.to(list_readings)),
        Endpoint::new(Method::POST, "/api/readings/", Write, |r| r.to(create_reading)),
        Endpoint::new(Method::GET, "/api/readings/{id}/", Read, |r| r.to(get_reading)),
        Endpoint::new(Method::PUT, "/api/readings/{id}/", Write, |r| r.to(update_reading)),
        Endpoint::new(Method::PATCH, "/api/readings/{id}/", Write, |r| r.to(partial_update_reading)),
        Endpoint::new(Method::DELETE, "/api/readings/{id}/", Write, |r| r.to(delete_reading)),
    ]
}

/// Capability of the table entry for `method` on the route `pattern`.
/// Unknown combinations are left to actix's 404/405 handling.
pub fn capability_of(method: &Method, pattern: &str) -> Capability {
    endpoints()
        .into_iter()
        .find(|e| e.method == *method && e.path == pattern)
        .map_or(Capability::Read, |e| e.capability)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| Error::BadRequest(err.to_string()).into()),
    );

    let table = endpoints();
    let mut paths: Vec<&'static str> = table.iter().map(|e| e.path).collect();
    paths.dedup();
    for path in paths {
        let mut resource = web::resource(path);
        for endpoint in table.iter().filter(|e| e.path == path) {
            resource = resource.route(endpoint.route());
        }
        cfg.service(resource.wrap(from_fn(write_gate)));
    }

    cfg.service(SwaggerUi::new(format!("{}{{_:.*}}", DOCS_PATH)).url(SCHEMA_PATH, ApiDoc::openapi()));
}

/// Runs before any extractor, so a rejected request never has its body read
/// and never reaches the store.
async fn write_gate(req: ServiceRequest, next: Next<BoxBody>) -> Result<ServiceResponse<BoxBody>, actix_web::Error> {
    let pattern = req.match_pattern().unwrap_or_default();
    if capability_of(req.method(), &pattern) == Capability::Write {
        let store = match req.app_data::<web::Data<dyn Store>>() {
            Some(store) => store.clone(),
            None => return Ok(req.error_response(Error::Store("no store configured".to_string()))),
        };
        if let Err(e) = require_write(req.request(), &store).await {
            return Ok(req.error_response(e));
        }
    }
    next.call(req).await
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_segments,
        create_segment,
        get_segment,
        update_segment,
        partial_update_segment,
        delete_segment,
        list_readings,
        create_reading,
        get_reading,
        update_reading,
        partial_update_reading,
        delete_reading
    ),
    components(schemas(SegmentSummary, SegmentDetail, ReadingView, SegmentPayload, ReadingPayload, Intensity)),
    modifiers(&TokenAuth),
    tags(
        (name = "segments", description = "Road segments with derived reading figures"),
        (name = "readings", description = "Speed readings and their intensity")
    ),
    info(
        title = "Traffic monitor API",
        description = "Road segments, speed readings and traffic intensity. Writes need an admin token."
    )
)]
pub struct ApiDoc;

struct TokenAuth;

impl Modify for TokenAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "Authorization",
                    "Token <key>",
                ))),
            );
        }
    }
}

/// Runs a store call on actix's blocking pool; the store API is synchronous.
pub async fn blocking<T, F>(store: &web::Data<dyn Store>, f: F) -> Result<T, Error>
where
    F: FnOnce(&dyn Store) -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone().into_inner();
    web::block(move || f(store.as_ref())).await?
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// An empty body counts as `{}` so missing fields surface as validation
/// errors. Anything else must be declared as JSON, or carry no content type.
fn parse_body<T: DeserializeOwned>(req: &HttpRequest, body: &web::Bytes) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_slice(b"{}").map_err(|e| Error::BadRequest(e.to_string()));
    }
    if let Some(value) = req.headers().get(header::CONTENT_TYPE) {
        let content_type = value.to_str().unwrap_or("");
        if !is_json(content_type) {
            return Err(Error::UnsupportedMediaType(content_type.to_string()));
        }
    }
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("JSON parse error - {}", e)))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SegmentQuery {
    /// Keep segments whose latest reading has this intensity
    /// (`elevada`, `média` or `baixa`). Unknown labels match nothing.
    pub intensity: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReadingQuery {
    /// Keep readings of this road segment.
    pub road_segment: Option<i32>,
}

/// List road segments
#[utoipa::path(
    get,
    path = "/api/segments/",
    tag = "segments",
    params(SegmentQuery),
    responses(
        (status = 200, description = "Segments ordered by id", body = [SegmentSummary]),
        (status = 400, description = "Malformed query")
    )
)]
async fn list_segments(
    store: web::Data<dyn Store>,
    query: web::Query<SegmentQuery>,
) -> Result<HttpResponse, Error> {
    let intensity = match query.into_inner().intensity.filter(|label| !label.is_empty()) {
        None => None,
        Some(label) => match Intensity::from_label(&label) {
            Some(level) => Some(level),
            // No reading can ever classify as an unknown label.
            None => return Ok(HttpResponse::Ok().json(Vec::<SegmentSummary>::new())),
        },
    };
    let filter = SegmentFilter { intensity };
    let records = blocking(&store, move |s| s.list_segments(&filter)).await?;
    let body: Vec<SegmentSummary> = records.iter().map(SegmentSummary::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// Road segment with its latest reading
#[utoipa::path(
    get,
    path = "/api/segments/{id}/",
    tag = "segments",
    params(("id" = i32, Path, description = "Road segment id")),
    responses(
        (status = 200, description = "Success", body = SegmentDetail),
        (status = 404, description = "No such segment")
    )
)]
async fn get_segment(store: web::Data<dyn Store>, id: web::Path<i32>) -> Result<HttpResponse, Error> {
    let id = id.into_inner();
    let record = blocking(&store, move |s| s.get_segment(id)).await?;
    Ok(HttpResponse::Ok().json(SegmentDetail::from(&record)))
}

/// Create a road segment
#[utoipa::path(
    post,
    path = "/api/segments/",
    tag = "segments",
    request_body = SegmentPayload,
    security(("token" = [])),
    responses(
        (status = 201, description = "Created", body = SegmentDetail),
        (status = 400, description = "Missing or malformed fields"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 415, description = "Body is not JSON")
    )
)]
async fn create_segment(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let new = parse_body::<SegmentPayload>(&req, &body)?.into_new()?;
    let record = blocking(&store, move |s| s.create_segment(&new)).await?;
    info!("created road segment {}", record.segment.id);
    Ok(HttpResponse::Created().json(SegmentDetail::from(&record)))
}

async fn write_segment(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: i32,
    changes: SegmentChanges,
) -> Result<HttpResponse, Error> {
    let record = blocking(&store, move |s| s.update_segment(id, &changes)).await?;
    info!("{} road segment {}", req.method(), id);
    Ok(HttpResponse::Ok().json(SegmentDetail::from(&record)))
}

/// Replace a road segment
///
/// Every writable field is required.
#[utoipa::path(
    put,
    path = "/api/segments/{id}/",
    tag = "segments",
    params(("id" = i32, Path, description = "Road segment id")),
    request_body = SegmentPayload,
    security(("token" = [])),
    responses(
        (status = 200, description = "Success", body = SegmentDetail),
        (status = 400, description = "Missing or malformed fields"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such segment")
    )
)]
async fn update_segment(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: web::Path<i32>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let changes = SegmentChanges::from(parse_body::<SegmentPayload>(&req, &body)?.into_new()?);
    write_segment(req, store, id.into_inner(), changes).await
}

/// Update some fields of a road segment
#[utoipa::path(
    patch,
    path = "/api/segments/{id}/",
    tag = "segments",
    params(("id" = i32, Path, description = "Road segment id")),
    request_body = SegmentPayload,
    security(("token" = [])),
    responses(
        (status = 200, description = "Success", body = SegmentDetail),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such segment")
    )
)]
async fn partial_update_segment(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: web::Path<i32>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let changes = parse_body::<SegmentPayload>(&req, &body)?.into_changes();
    write_segment(req, store, id.into_inner(), changes).await
}

/// Delete a road segment and all of its readings
#[utoipa::path(
    delete,
    path = "/api/segments/{id}/",
    tag = "segments",
    params(("id" = i32, Path, description = "Road segment id")),
    security(("token" = [])),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such segment")
    )
)]
async fn delete_segment(store: web::Data<dyn Store>, id: web::Path<i32>) -> Result<HttpResponse, Error> {
    let id = id.into_inner();
    blocking(&store, move |s| s.delete_segment(id)).await?;
    info!("deleted road segment {}", id);
    Ok(HttpResponse::NoContent().finish())
}

/// List speed readings, newest first
#[utoipa::path(
    get,
    path = "/api/readings/",
    tag = "readings",
    params(ReadingQuery),
    responses(
        (status = 200, description = "Success", body = [ReadingView]),
        (status = 400, description = "Malformed query")
    )
)]
async fn list_readings(
    store: web::Data<dyn Store>,
    query: web::Query<ReadingQuery>,
) -> Result<HttpResponse, Error> {
    let filter = ReadingFilter {
        road_segment: query.into_inner().road_segment,
    };
    let readings = blocking(&store, move |s| s.list_readings(&filter)).await?;
    let body: Vec<ReadingView> = readings.iter().map(ReadingView::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/api/readings/{id}/",
    tag = "readings",
    params(("id" = i32, Path, description = "Speed reading id")),
    responses(
        (status = 200, description = "Success", body = ReadingView),
        (status = 404, description = "No such reading")
    )
)]
async fn get_reading(store: web::Data<dyn Store>, id: web::Path<i32>) -> Result<HttpResponse, Error> {
    let id = id.into_inner();
    let reading = blocking(&store, move |s| s.get_reading(id)).await?;
    Ok(HttpResponse::Ok().json(ReadingView::from(&reading)))
}

/// Record a speed reading
#[utoipa::path(
    post,
    path = "/api/readings/",
    tag = "readings",
    request_body = ReadingPayload,
    security(("token" = [])),
    responses(
        (status = 201, description = "Created", body = ReadingView),
        (status = 400, description = "Missing or malformed fields"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Road segment does not exist"),
        (status = 415, description = "Body is not JSON")
    )
)]
async fn create_reading(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let new = parse_body::<ReadingPayload>(&req, &body)?.into_new()?;
    let reading = blocking(&store, move |s| s.create_reading(&new)).await?;
    info!("created speed reading {} on segment {}", reading.id, reading.road_segment);
    Ok(HttpResponse::Created().json(ReadingView::from(&reading)))
}

async fn write_reading(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: i32,
    changes: ReadingChanges,
) -> Result<HttpResponse, Error> {
    let reading = blocking(&store, move |s| s.update_reading(id, &changes)).await?;
    info!("{} speed reading {}", req.method(), id);
    Ok(HttpResponse::Ok().json(ReadingView::from(&reading)))
}

#[utoipa::path(
    put,
    path = "/api/readings/{id}/",
    tag = "readings",
    params(("id" = i32, Path, description = "Speed reading id")),
    request_body = ReadingPayload,
    security(("token" = [])),
    responses(
        (status = 200, description = "Success", body = ReadingView),
        (status = 400, description = "Missing or malformed fields"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such reading or road segment")
    )
)]
async fn update_reading(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: web::Path<i32>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let changes = ReadingChanges::from(parse_body::<ReadingPayload>(&req, &body)?.into_new()?);
    write_reading(req, store, id.into_inner(), changes).await
}

#[utoipa::path(
    patch,
    path = "/api/readings/{id}/",
    tag = "readings",
    params(("id" = i32, Path, description = "Speed reading id")),
    request_body = ReadingPayload,
    security(("token" = [])),
    responses(
        (status = 200, description = "Success", body = ReadingView),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such reading or road segment")
    )
)]
async fn partial_update_reading(
    req: HttpRequest,
    store: web::Data<dyn Store>,
    id: web::Path<i32>,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let changes = parse_body::<ReadingPayload>(&req, &body)?.into_changes();
    write_reading(req, store, id.into_inner(), changes).await
}

#[utoipa::path(
    delete,
    path = "/api/readings/{id}/",
    tag = "readings",
    params(("id" = i32, Path, description = "Speed reading id")),
    security(("token" = [])),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "No or invalid token"),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "No such reading")
    )
)]
async fn delete_reading(store: web::Data<dyn Store>, id: web::Path<i32>) -> Result<HttpResponse, Error> {
    let id = id.into_inner();
    blocking(&store, move |s| s.delete_reading(id)).await?;
    info!("deleted speed reading {}", id);
    Ok(HttpResponse::NoContent().finish())
}
