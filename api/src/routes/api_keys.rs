use actix_web::{delete, get, post, web::Path, HttpResponse};
use serde_json::json;

use models::api_keys::{ApiKey, InsertableApiKey};
use xerror::api::*;

use crate::dto::ApiKeyResponse;
use crate::jwt::AuthData;
use crate::{WebContext, WebDbPool};

/// The plain key is part of this response only.
#[post("/apikey")]
pub async fn create_api_key(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

    let (key, row) = InsertableApiKey::generate(auth_data.uid);
    let api_key = row.insert(&conn).map_err(|e| context.model_error(e))?;

    let mut response = ApiKeyResponse::from(&api_key);
    response.key = Some(key);
    Ok(HttpResponse::Created().json(response))
}

#[get("/apikeys")]
pub async fn list_api_keys(pool: WebDbPool, context: WebContext, auth_data: AuthData) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

    let keys = ApiKey::list_for_user(&conn, auth_data.uid).map_err(|e| context.model_error(e))?;
    let keys: Vec<ApiKeyResponse> = keys.iter().map(ApiKeyResponse::from).collect();
    Ok(HttpResponse::Ok().json(keys))
}

#[delete("/apikey/{id}")]
pub async fn delete_api_key(
    pool: WebDbPool,
    context: WebContext,
    auth_data: AuthData,
    id: Path<i32>,
) -> Result<HttpResponse, ApiError> {
    let conn = pool.get().map_err(|_| ApiError::Db(DbError::DbConnectionError))?;

    let deleted = ApiKey::delete_of_user(&conn, auth_data.uid, id.into_inner()).map_err(|e| context.model_error(e))?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Api key".to_string()));
    }
    Ok(HttpResponse::Ok().json(json!({"deleted": deleted})))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_rt::test]
    async fn revoking_needs_a_numeric_id() {
        let app = test::init_service(App::new().configure(crate::configure(unreachable_pool(), context()))).await;
        let request = test::TestRequest::delete()
            .uri("/apikey/latest")
            .insert_header(("Authorization", bearer(1)))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn listing_needs_credentials() {
        let app = test::init_service(App::new().configure(crate::configure(unreachable_pool(), context()))).await;
        let response = test::call_service(&app, test::TestRequest::get().uri("/apikeys").to_request()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
