pub mod health_route;
pub mod operator_route;
pub mod query_route;
