//! Parameter binding utilities for MySQL queries.
//!
//! Sessions hand parameters to background cursor tasks, so binding works on
//! owned values and produces `'static` queries.

use crate::models::QueryParam;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::types::Json;

pub(crate) type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_param<'q>(query: MySqlQuery<'q>, param: QueryParam) -> MySqlQuery<'q> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(v),
        QueryParam::Int(v) => query.bind(v),
        QueryParam::UInt(v) => query.bind(v),
        QueryParam::Float(v) => query.bind(v),
        QueryParam::String(v) => query.bind(v),
        QueryParam::Bytes(v) => query.bind(v),
        QueryParam::DateTime(v) => query.bind(v),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Build a query over `sql` with every parameter bound in order.
pub(crate) fn build_query<'q>(sql: &'q str, params: Vec<QueryParam>) -> MySqlQuery<'q> {
    params
        .into_iter()
        .fold(sqlx::query(sql), bind_param)
}
