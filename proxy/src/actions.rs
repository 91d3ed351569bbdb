//! The closed set of operations the proxy forwards to the Dr. Green API.
//!
//! Each action declares its access level, its parameters and the exact
//! upstream call it produces, including which part of the request is
//! signed. Query-signed calls sign the URL-encoded query string; body-signed
//! calls sign the serialized JSON body.

use crate::errors::ProxyError;
use drgreen::UpstreamRequest;
use http::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use store::Access;

const DEFAULT_COUNTRY: &str = "PRT";
const DEFAULT_ORDER: &str = "desc";
const DEFAULT_TAKE: u32 = 10;
const LEGACY_TAKE: u32 = 100;
const DEFAULT_PAGE: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    GetStrains,
    GetStrainsLegacy,
    GetStrain,
    CreateClient,
    GetClient,
    GetCart,
    AddToCart,
    RemoveFromCart,
    EmptyCart,
    PlaceOrder,
    GetOrders,
    GetOrder,
    DappClients,
    DappOrders,
    UpdateOrder,
    ApproveClient,
    RejectClient,
    DashboardSummary,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[
        ActionKind::GetStrains,
        ActionKind::GetStrainsLegacy,
        ActionKind::GetStrain,
        ActionKind::CreateClient,
        ActionKind::GetClient,
        ActionKind::GetCart,
        ActionKind::AddToCart,
        ActionKind::RemoveFromCart,
        ActionKind::EmptyCart,
        ActionKind::PlaceOrder,
        ActionKind::GetOrders,
        ActionKind::GetOrder,
        ActionKind::DappClients,
        ActionKind::DappOrders,
        ActionKind::UpdateOrder,
        ActionKind::ApproveClient,
        ActionKind::RejectClient,
        ActionKind::DashboardSummary,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            ActionKind::GetStrains => "get-strains",
            ActionKind::GetStrainsLegacy => "get-strains-legacy",
            ActionKind::GetStrain => "get-strain",
            ActionKind::CreateClient => "create-client",
            ActionKind::GetClient => "get-client",
            ActionKind::GetCart => "get-cart",
            ActionKind::AddToCart => "add-to-cart",
            ActionKind::RemoveFromCart => "remove-from-cart",
            ActionKind::EmptyCart => "empty-cart",
            ActionKind::PlaceOrder => "place-order",
            ActionKind::GetOrders => "get-orders",
            ActionKind::GetOrder => "get-order",
            ActionKind::DappClients => "dapp-clients",
            ActionKind::DappOrders => "dapp-orders",
            ActionKind::UpdateOrder => "update-order",
            ActionKind::ApproveClient => "approve-client",
            ActionKind::RejectClient => "reject-client",
            ActionKind::DashboardSummary => "dashboard-summary",
        }
    }

    pub fn from_name(name: &str) -> Option<ActionKind> {
        ActionKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub const fn access(&self) -> Access {
        match self {
            ActionKind::GetStrains | ActionKind::GetStrainsLegacy | ActionKind::GetStrain => {
                Access::Public
            }
            ActionKind::CreateClient
            | ActionKind::GetClient
            | ActionKind::GetCart
            | ActionKind::AddToCart
            | ActionKind::RemoveFromCart
            | ActionKind::EmptyCart
            | ActionKind::PlaceOrder
            | ActionKind::GetOrders
            | ActionKind::GetOrder => Access::User,
            ActionKind::DappClients
            | ActionKind::DappOrders
            | ActionKind::UpdateOrder
            | ActionKind::ApproveClient
            | ActionKind::RejectClient
            | ActionKind::DashboardSummary => Access::Admin,
        }
    }
}

/// Every parameter any action accepts. Each action picks what it needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    strain_id: Option<String>,
    client_id: Option<String>,
    cart_id: Option<String>,
    order_id: Option<String>,
    quantity: Option<u32>,
    data: Option<Value>,
    country_code: Option<String>,
    order_by: Option<String>,
    take: Option<u32>,
    page: Option<u32>,
    search: Option<String>,
    search_by: Option<String>,
    status: Option<String>,
    kyc: Option<bool>,
    admin_approval: Option<String>,
    client_ids: Option<Vec<String>>,
    order_status: Option<String>,
    payment_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paging {
    pub order_by: String,
    pub take: u32,
    pub page: u32,
}

impl Paging {
    fn from_raw(raw: &RawParams, default_take: u32) -> Self {
        Paging {
            order_by: raw
                .order_by
                .clone()
                .unwrap_or_else(|| DEFAULT_ORDER.to_string()),
            take: raw.take.unwrap_or(default_take),
            page: raw.page.unwrap_or(DEFAULT_PAGE),
        }
    }

    fn apply(&self, request: UpstreamRequest) -> UpstreamRequest {
        request
            .query("orderBy", &self.order_by)
            .query("take", self.take)
            .query("page", self.page)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ListFilters {
    pub search: Option<String>,
    pub search_by: Option<String>,
    pub status: Option<String>,
    pub kyc: Option<bool>,
    pub admin_approval: Option<String>,
    pub client_ids: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    GetStrains { country_code: String, paging: Paging },
    GetStrainsLegacy { paging: Paging },
    GetStrain { strain_id: String },
    CreateClient { data: Value },
    GetClient { client_id: String },
    GetCart { client_id: String },
    AddToCart { client_id: String, strain_id: String, quantity: u32 },
    RemoveFromCart { cart_id: String, strain_id: String },
    EmptyCart { client_id: String },
    PlaceOrder { client_id: String },
    GetOrders { client_id: String, paging: Paging },
    GetOrder { order_id: String },
    DappClients { paging: Paging, filters: ListFilters },
    DappOrders { paging: Paging, filters: ListFilters },
    UpdateOrder { order_id: String, changes: Value },
    ApproveClient { client_id: String },
    RejectClient { client_id: String },
    DashboardSummary,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ProxyError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ProxyError::MissingParameter(name))?;
    Ok(value)
}

/// A required value that is interpolated into the upstream path.
fn path_segment(value: Option<String>, name: &'static str) -> Result<String, ProxyError> {
    let value = required(value, name)?;
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(value)
    } else {
        Err(ProxyError::InvalidParameter {
            name,
            reason: "must contain only letters, digits, '-' or '_'".into(),
        })
    }
}

impl Action {
    /// Resolves `{action, ...params}` into a typed action. The action name is
    /// checked before any parameter parsing.
    pub fn from_request(body: &Value) -> Result<Action, ProxyError> {
        let name = match body.get("action") {
            Some(Value::String(name)) => name.as_str(),
            Some(_) => {
                return Err(ProxyError::InvalidParameter {
                    name: "action",
                    reason: "must be a string".into(),
                });
            }
            None => return Err(ProxyError::MissingParameter("action")),
        };
        let kind =
            ActionKind::from_name(name).ok_or_else(|| ProxyError::UnknownAction(name.into()))?;

        let raw: RawParams = serde_json::from_value(body.clone())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        Action::build(kind, raw)
    }

    fn build(kind: ActionKind, raw: RawParams) -> Result<Action, ProxyError> {
        let action = match kind {
            ActionKind::GetStrains => Action::GetStrains {
                country_code: raw
                    .country_code
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
                paging: Paging::from_raw(&raw, DEFAULT_TAKE),
            },
            ActionKind::GetStrainsLegacy => Action::GetStrainsLegacy {
                paging: Paging::from_raw(&raw, LEGACY_TAKE),
            },
            ActionKind::GetStrain => Action::GetStrain {
                strain_id: path_segment(raw.strain_id, "strainId")?,
            },
            ActionKind::CreateClient => match raw.data {
                Some(data @ Value::Object(_)) => Action::CreateClient { data },
                Some(_) => {
                    return Err(ProxyError::InvalidParameter {
                        name: "data",
                        reason: "must be an object".into(),
                    });
                }
                None => return Err(ProxyError::MissingParameter("data")),
            },
            ActionKind::GetClient => Action::GetClient {
                client_id: path_segment(raw.client_id, "clientId")?,
            },
            ActionKind::GetCart => Action::GetCart {
                client_id: required(raw.client_id, "clientId")?,
            },
            ActionKind::AddToCart => Action::AddToCart {
                client_id: required(raw.client_id, "clientId")?,
                strain_id: required(raw.strain_id, "strainId")?,
                quantity: match raw.quantity {
                    Some(0) => {
                        return Err(ProxyError::InvalidParameter {
                            name: "quantity",
                            reason: "must be at least 1".into(),
                        });
                    }
                    Some(q) => q,
                    None => 1,
                },
            },
            ActionKind::RemoveFromCart => Action::RemoveFromCart {
                cart_id: path_segment(raw.cart_id, "cartId")?,
                strain_id: required(raw.strain_id, "strainId")?,
            },
            ActionKind::EmptyCart => Action::EmptyCart {
                client_id: path_segment(raw.client_id, "clientId")?,
            },
            ActionKind::PlaceOrder => Action::PlaceOrder {
                client_id: required(raw.client_id, "clientId")?,
            },
            ActionKind::GetOrders => {
                let paging = Paging::from_raw(&raw, DEFAULT_TAKE);
                Action::GetOrders {
                    client_id: path_segment(raw.client_id, "clientId")?,
                    paging,
                }
            }
            ActionKind::GetOrder => Action::GetOrder {
                order_id: path_segment(raw.order_id, "orderId")?,
            },
            ActionKind::DappClients | ActionKind::DappOrders => {
                let paging = Paging::from_raw(&raw, DEFAULT_TAKE);
                let filters = ListFilters {
                    search: raw.search,
                    search_by: raw.search_by,
                    status: raw.status,
                    kyc: raw.kyc,
                    admin_approval: raw.admin_approval,
                    client_ids: raw.client_ids,
                };
                if kind == ActionKind::DappClients {
                    Action::DappClients { paging, filters }
                } else {
                    Action::DappOrders { paging, filters }
                }
            }
            ActionKind::UpdateOrder => {
                let order_id = path_segment(raw.order_id, "orderId")?;
                let mut changes = Map::new();
                if let Some(status) = raw.order_status {
                    changes.insert("orderStatus".into(), json!(status));
                }
                if let Some(status) = raw.payment_status {
                    changes.insert("paymentStatus".into(), json!(status));
                }
                if changes.is_empty() {
                    return Err(ProxyError::MissingParameter("orderStatus"));
                }
                Action::UpdateOrder {
                    order_id,
                    changes: Value::Object(changes),
                }
            }
            ActionKind::ApproveClient => Action::ApproveClient {
                client_id: path_segment(raw.client_id, "clientId")?,
            },
            ActionKind::RejectClient => Action::RejectClient {
                client_id: path_segment(raw.client_id, "clientId")?,
            },
            ActionKind::DashboardSummary => Action::DashboardSummary,
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::GetStrains { .. } => ActionKind::GetStrains,
            Action::GetStrainsLegacy { .. } => ActionKind::GetStrainsLegacy,
            Action::GetStrain { .. } => ActionKind::GetStrain,
            Action::CreateClient { .. } => ActionKind::CreateClient,
            Action::GetClient { .. } => ActionKind::GetClient,
            Action::GetCart { .. } => ActionKind::GetCart,
            Action::AddToCart { .. } => ActionKind::AddToCart,
            Action::RemoveFromCart { .. } => ActionKind::RemoveFromCart,
            Action::EmptyCart { .. } => ActionKind::EmptyCart,
            Action::PlaceOrder { .. } => ActionKind::PlaceOrder,
            Action::GetOrders { .. } => ActionKind::GetOrders,
            Action::GetOrder { .. } => ActionKind::GetOrder,
            Action::DappClients { .. } => ActionKind::DappClients,
            Action::DappOrders { .. } => ActionKind::DappOrders,
            Action::UpdateOrder { .. } => ActionKind::UpdateOrder,
            Action::ApproveClient { .. } => ActionKind::ApproveClient,
            Action::RejectClient { .. } => ActionKind::RejectClient,
            Action::DashboardSummary => ActionKind::DashboardSummary,
        }
    }

    pub fn access(&self) -> Access {
        self.kind().access()
    }

    /// The upstream client id a non-admin caller must own to run this action.
    pub fn client_scope(&self) -> Option<&str> {
        match self {
            Action::GetClient { client_id }
            | Action::GetCart { client_id }
            | Action::AddToCart { client_id, .. }
            | Action::EmptyCart { client_id }
            | Action::PlaceOrder { client_id }
            | Action::GetOrders { client_id, .. } => Some(client_id),
            _ => None,
        }
    }

    /// Request that reveals the owning client of a resource addressed by its
    /// own id rather than by client id.
    pub fn owner_lookup(&self) -> Option<UpstreamRequest> {
        match self {
            Action::GetOrder { order_id } => {
                Some(UpstreamRequest::get(format!("/dapp/orders/{order_id}")))
            }
            Action::RemoveFromCart { cart_id, .. } => {
                Some(UpstreamRequest::get(format!("/dapp/carts/{cart_id}")))
            }
            _ => None,
        }
    }

    pub fn upstream_request(&self) -> UpstreamRequest {
        match self {
            Action::GetStrains {
                country_code,
                paging,
            } => paging.apply(UpstreamRequest::get("/strains").query("countryCode", country_code)),
            Action::GetStrainsLegacy { paging } => paging.apply(UpstreamRequest::get("/strains")),
            Action::GetStrain { strain_id } => {
                UpstreamRequest::get(format!("/strains/{strain_id}"))
            }
            Action::CreateClient { data } => {
                UpstreamRequest::with_body(Method::POST, "/dapp/clients", data.clone())
            }
            Action::GetClient { client_id } => {
                UpstreamRequest::get(format!("/dapp/clients/{client_id}"))
            }
            Action::GetCart { client_id } => {
                UpstreamRequest::get("/dapp/carts").query("clientId", client_id)
            }
            Action::AddToCart {
                client_id,
                strain_id,
                quantity,
            } => UpstreamRequest::with_body(
                Method::POST,
                "/dapp/carts",
                json!({
                    "clientId": client_id,
                    "items": [{"strainId": strain_id, "quantity": quantity}],
                }),
            ),
            Action::RemoveFromCart { cart_id, strain_id } => {
                let mut request = UpstreamRequest::get(format!("/dapp/carts/{cart_id}"))
                    .query("strainId", strain_id);
                request.method = Method::DELETE;
                request
            }
            Action::EmptyCart { client_id } => {
                let mut request = UpstreamRequest::get(format!("/dapp/carts/client/{client_id}"));
                request.method = Method::DELETE;
                request
            }
            Action::PlaceOrder { client_id } => UpstreamRequest::with_body(
                Method::POST,
                "/dapp/orders",
                json!({ "clientId": client_id }),
            ),
            Action::GetOrders { client_id, paging } => {
                paging.apply(UpstreamRequest::get(format!("/dapp/client/{client_id}/orders")))
            }
            Action::GetOrder { order_id } => {
                UpstreamRequest::get(format!("/dapp/orders/{order_id}"))
            }
            Action::DappClients { paging, filters } => paging
                .apply(UpstreamRequest::get("/dapp/clients"))
                .query_opt("search", filters.search.as_ref())
                .query_opt("searchBy", filters.search_by.as_ref())
                .query_opt("status", filters.status.as_ref())
                .query_opt("kyc", filters.kyc)
                .query_opt("adminApproval", filters.admin_approval.as_ref()),
            Action::DappOrders { paging, filters } => paging
                .apply(UpstreamRequest::get("/dapp/orders"))
                .query_opt("search", filters.search.as_ref())
                .query_opt("searchBy", filters.search_by.as_ref())
                .query_opt("adminApproval", filters.admin_approval.as_ref())
                .query_opt("clientIds", filters.client_ids.as_ref().map(|ids| ids.join(","))),
            Action::UpdateOrder { order_id, changes } => UpstreamRequest::with_body(
                Method::PATCH,
                format!("/dapp/orders/{order_id}"),
                changes.clone(),
            ),
            Action::ApproveClient { client_id } => UpstreamRequest::with_body(
                Method::PATCH,
                format!("/dapp/clients/{client_id}/approve"),
                json!({}),
            ),
            Action::RejectClient { client_id } => UpstreamRequest::with_body(
                Method::PATCH,
                format!("/dapp/clients/{client_id}/reject"),
                json!({}),
            ),
            Action::DashboardSummary => UpstreamRequest::get("/dapp/dashboard/summary"),
        }
    }
}
