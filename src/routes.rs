use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::Method,
    routing::get,
    Json,
    Router,
};
use bytes::Bytes;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    http_objects::{
        Function,
        FunctionResponse,
        FunctionUpdate,
        FunctionUpdateRequest,
        FunctionsList,
        ListParams,
        RegistryAPIError,
    },
    registry::{ListRequest, RegistryService},
};

#[derive(OpenApi)]
#[openapi(
        paths(
            list_functions,
            get_function,
            put_function,
            delete_function,
        ),
        components(
            schemas(
                Function,
                FunctionUpdate,
                FunctionUpdateRequest,
                FunctionResponse,
                FunctionsList,
                RegistryAPIError,
            )
        ),
        tags(
            (name = "functions", description = "Function registry API")
        )
    )]
pub struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub registry: RegistryService,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route(
            "/v1/functions",
            get(list_functions).with_state(route_state.clone()),
        )
        .route(
            "/v1/functions/{name}",
            get(get_function)
                .put(put_function)
                .delete(delete_function)
                .with_state(route_state.clone()),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
}

async fn index() -> &'static str {
    "Function Registry Server"
}

/// List functions ordered by name
#[utoipa::path(
    get,
    path = "/v1/functions",
    params(ListParams),
    tag = "functions",
    responses(
        (status = 200, description = "A page of functions", body = FunctionsList),
        (status = BAD_REQUEST, description = "Malformed cursor"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
async fn list_functions(
    State(state): State<RouteState>,
    Query(params): Query<ListParams>,
) -> Result<Json<FunctionsList>, RegistryAPIError> {
    let listing = state.registry.list_functions(ListRequest {
        per_page: params.per_page,
        cursor: params.cursor,
        image: params.image,
    })?;
    Ok(Json(listing.into()))
}

/// Get a function by name
#[utoipa::path(
    get,
    path = "/v1/functions/{name}",
    params(("name" = String, Path, description = "Function name")),
    tag = "functions",
    responses(
        (status = 200, description = "The function", body = FunctionResponse),
        (status = NOT_FOUND, description = "Function not found"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
async fn get_function(
    State(state): State<RouteState>,
    Path(name): Path<String>,
) -> Result<Json<FunctionResponse>, RegistryAPIError> {
    let record = state.registry.get_function(&name)?;
    Ok(Json(record.into()))
}

/// Create a function, or merge the given fields into an existing one
#[utoipa::path(
    put,
    path = "/v1/functions/{name}",
    params(("name" = String, Path, description = "Function name")),
    request_body = FunctionUpdateRequest,
    tag = "functions",
    responses(
        (status = 200, description = "The stored function", body = FunctionResponse),
        (status = BAD_REQUEST, description = "Invalid function definition"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
async fn put_function(
    State(state): State<RouteState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<FunctionResponse>, RegistryAPIError> {
    let patch = FunctionUpdateRequest::from_body(&body)?;
    let record = state.registry.put_function(&name, patch).await?;
    Ok(Json(record.into()))
}

/// Delete a function
#[utoipa::path(
    delete,
    path = "/v1/functions/{name}",
    params(("name" = String, Path, description = "Function name")),
    tag = "functions",
    responses(
        (status = 200, description = "Function deleted"),
        (status = NOT_FOUND, description = "Function not found"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
async fn delete_function(
    State(state): State<RouteState>,
    Path(name): Path<String>,
) -> Result<(), RegistryAPIError> {
    state.registry.delete_function(&name).await?;
    Ok(())
}
