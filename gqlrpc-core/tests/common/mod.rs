#![allow(dead_code)]

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::post,
};
use std::{
    fs,
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::{net::TcpListener, sync::Notify};

pub const USERS_PROTO: &str = r#"syntax = "proto3";

package users.v1;

import "gqlrpc/options/v1/annotations.proto";

service UserService {
  rpc GetUser(GetUserRequest) returns (GetUserResponse);
  rpc ListUsers(ListUsersRequest) returns (ListUsersResponse);
  rpc WatchUsers(ListUsersRequest) returns (stream ListUsersResponse);
}

enum Role {
  ROLE_UNSPECIFIED = 0;
  ROLE_ADMIN = 1;
  ROLE_MEMBER = 2;
}

message GetUserRequest {
  string user_id = 1 [(gqlrpc.options.v1.graphql_variable_name) = "id"];
}

message GetUserResponse {
  User user = 1;
}

message ListUsersRequest {
  Role role = 1;
  int32 limit = 2;
}

message ListUsersResponse {
  repeated User users = 1;
}

message User {
  string id = 1;
  string name = 2;
  Role role = 3;
}
"#;

pub const GET_USER_OPERATION: &str = r#"query GetUser($id: ID!) {
  user(id: $id) {
    id
    name
    role
  }
}
"#;

pub const LIST_USERS_OPERATION: &str = r#"query ListUsers($role: Role, $limit: Int) {
  users(role: $role, limit: $limit) {
    id
    name
  }
}
"#;

pub const ORDERS_PROTO: &str = r#"syntax = "proto3";

package orders.v1;

service OrderService {
  rpc CreateOrder(CreateOrderRequest) returns (CreateOrderResponse);
}

message CreateOrderRequest {
  string sku = 1;
  int32 quantity = 2;
}

message CreateOrderResponse {
  Order create_order = 1;
}

message Order {
  string id = 1;
}
"#;

pub const CREATE_ORDER_OPERATION: &str = r#"mutation CreateOrder($sku: String!, $quantity: Int!) {
  createOrder(sku: $sku, quantity: $quantity) {
    id
  }
}
"#;

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// `users/` with the user service and its two queries.
pub fn users_service(root: &Path) {
    write_file(root, "users/users.proto", USERS_PROTO);
    write_file(root, "users/GetUser.graphql", GET_USER_OPERATION);
    write_file(root, "users/ListUsers.graphql", LIST_USERS_OPERATION);
}

/// `orders/` with the order service and its mutation.
pub fn orders_service(root: &Path) {
    write_file(root, "orders/orders.proto", ORDERS_PROTO);
    write_file(root, "orders/CreateOrder.graphql", CREATE_ORDER_OPERATION);
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Keeps one upstream request open until released.
#[derive(Default)]
pub struct Hold {
    arrived: Notify,
    release: Notify,
}

impl Hold {
    /// Resolves once the held request reached the upstream.
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    /// Lets the held request get its reply.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// In-process GraphQL server answering every request with a configurable reply.
#[derive(Clone)]
pub struct Upstream {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    reply: Arc<Mutex<(StatusCode, String)>>,
    hold: Arc<Mutex<Option<Arc<Hold>>>>,
}

impl Upstream {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = Upstream {
            addr,
            requests: Arc::default(),
            reply: Arc::new(Mutex::new((StatusCode::OK, r#"{"data":{}}"#.to_string()))),
            hold: Arc::default(),
        };

        let app = Router::new()
            .route("/graphql", post(graphql))
            .with_state(upstream.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        upstream
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    pub fn reply(&self, status: StatusCode, body: impl Into<String>) {
        *self.reply.lock().unwrap() = (status, body.into());
    }

    /// Holds the next request open until [`Hold::release`].
    pub fn hold(&self) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        *self.hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> CapturedRequest {
        self.requests().pop().expect("no request reached the upstream")
    }
}

async fn graphql(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    upstream
        .requests
        .lock()
        .unwrap()
        .push(CapturedRequest { headers, body });

    let hold = upstream.hold.lock().unwrap().take();
    if let Some(hold) = hold {
        hold.arrived.notify_one();
        hold.release.notified().await;
    }

    let (status, reply) = upstream.reply.lock().unwrap().clone();
    (status, [(CONTENT_TYPE, "application/json")], reply)
}
