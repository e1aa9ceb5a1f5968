//! RPC envelope: requests, responses, and server-initiated notifications.
//!
//! Requests are JSON objects `{tsx_id, method, params}`; the method name
//! selects a tagged variant. Responses echo `tsx_id` and carry either a
//! `result` or a numeric error code `ec`. Notifications are method/params
//! envelopes with no transaction id.
//!
//! Binary fields (avatars, post and comment content) cross the wire as
//! base64url strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token absent, malformed, or expired.
pub const ERR_ACCESS_TOKEN_EXP: i64 = -1;
/// Authenticated but lacking the required accessibility.
pub const ERR_NOT_AUTHORIZED: i64 = -2;
/// Precondition about presence/absence of a relation violated.
pub const ERR_WRONG_STATE: i64 = -3;
/// Referenced channel, post, comment, or subscription does not exist.
pub const ERR_NOT_EXIST: i64 = -4;
/// Uniqueness violation.
pub const ERR_ALREADY_EXISTS: i64 = -5;
/// Storage failure or unexpected I/O error.
pub const ERR_INTERNAL_ERROR: i64 = -6;

/// Serde adapter encoding `Vec<u8>` fields as base64url strings.
pub mod b64 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug)]
pub enum RpcError {
    Json(serde_json::Error),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Json(e) => write!(f, "envelope error: {e}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Json(e)
    }
}

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

/// A user as derived from access-token claims plus the storage-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: i64,
    pub name: String,
    pub did: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChanInfo {
    pub chan_id: u64,
    pub name: String,
    pub intro: String,
    pub owner: UserInfo,
    pub created_at: u64,
    pub upd_at: u64,
    pub subs: u64,
    pub next_post_id: u64,
    #[serde(with = "b64")]
    pub avatar: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInfo {
    pub chan_id: u64,
    pub post_id: u64,
    pub created_at: u64,
    pub upd_at: u64,
    #[serde(with = "b64")]
    pub content: Vec<u8>,
    pub cmts: u64,
    pub likes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmtInfo {
    pub chan_id: u64,
    pub post_id: u64,
    pub cmt_id: u64,
    /// 0 means a top-level comment.
    pub reply_to_cmt: u64,
    pub user: UserInfo,
    #[serde(with = "b64")]
    pub content: Vec<u8>,
    pub created_at: u64,
    pub upd_at: u64,
    pub likes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeInfo {
    pub chan_id: u64,
    pub post_id: u64,
    /// 0 means the like is on the post itself.
    pub cmt_id: u64,
    pub user: UserInfo,
    pub total_cnt: u64,
}

// ---------------------------------------------------------------------------
// Query criteria
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryBy {
    #[default]
    None,
    Id,
    UpdatedAt,
    CreatedAt,
}

/// Range query shared by every listing endpoint. Bounds are inclusive where
/// populated; zero means unbounded in that direction, and `maxcnt` 0 means
/// no cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryCriteria {
    pub by: QueryBy,
    pub upper: u64,
    pub lower: u64,
    pub maxcnt: u64,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Who may invoke a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    Anyone,
    Authenticated,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInParams {
    pub doc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidAuthParams {
    pub vp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelParams {
    pub tk: String,
    pub name: String,
    pub intro: String,
    #[serde(with = "b64", default)]
    pub avatar: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPostParams {
    pub tk: String,
    pub chan_id: u64,
    #[serde(with = "b64", default)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentParams {
    pub tk: String,
    pub chan_id: u64,
    pub post_id: u64,
    /// Comment being replied to; 0 for a top-level comment.
    #[serde(default)]
    pub cmt_id: u64,
    #[serde(with = "b64", default)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeParams {
    pub tk: String,
    pub chan_id: u64,
    pub post_id: u64,
    #[serde(default)]
    pub cmt_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelIdParams {
    pub tk: String,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenParams {
    pub tk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    pub tk: String,
    #[serde(default)]
    pub qc: QueryCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostsQueryParams {
    pub tk: String,
    pub chan_id: u64,
    #[serde(default)]
    pub qc: QueryCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsQueryParams {
    pub tk: String,
    pub chan_id: u64,
    pub post_id: u64,
    #[serde(default)]
    pub qc: QueryCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Method {
    SignIn(SignInParams),
    DidAuth(DidAuthParams),
    CreateChannel(CreateChannelParams),
    PublishPost(PublishPostParams),
    PostComment(PostCommentParams),
    PostLike(LikeParams),
    PostUnlike(LikeParams),
    SubscribeChannel(ChannelIdParams),
    UnsubscribeChannel(ChannelIdParams),
    EnableNotification(TokenParams),
    GetMyChannels(QueryParams),
    GetMyChannelsMetadata(QueryParams),
    GetChannels(QueryParams),
    GetChannelDetail(ChannelIdParams),
    GetSubscribedChannels(QueryParams),
    GetPosts(PostsQueryParams),
    GetLikedPosts(QueryParams),
    GetComments(CommentsQueryParams),
    GetStatistics(TokenParams),
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::SignIn(_) => "sign_in",
            Method::DidAuth(_) => "did_auth",
            Method::CreateChannel(_) => "create_channel",
            Method::PublishPost(_) => "publish_post",
            Method::PostComment(_) => "post_comment",
            Method::PostLike(_) => "post_like",
            Method::PostUnlike(_) => "post_unlike",
            Method::SubscribeChannel(_) => "subscribe_channel",
            Method::UnsubscribeChannel(_) => "unsubscribe_channel",
            Method::EnableNotification(_) => "enable_notification",
            Method::GetMyChannels(_) => "get_my_channels",
            Method::GetMyChannelsMetadata(_) => "get_my_channels_metadata",
            Method::GetChannels(_) => "get_channels",
            Method::GetChannelDetail(_) => "get_channel_detail",
            Method::GetSubscribedChannels(_) => "get_subscribed_channels",
            Method::GetPosts(_) => "get_posts",
            Method::GetLikedPosts(_) => "get_liked_posts",
            Method::GetComments(_) => "get_comments",
            Method::GetStatistics(_) => "get_statistics",
        }
    }

    pub fn accessibility(&self) -> Accessibility {
        match self {
            Method::SignIn(_) | Method::DidAuth(_) => Accessibility::Anyone,
            Method::CreateChannel(_)
            | Method::PublishPost(_)
            | Method::GetMyChannels(_)
            | Method::GetMyChannelsMetadata(_) => Accessibility::Owner,
            _ => Accessibility::Authenticated,
        }
    }
}

/// One inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub tsx_id: u64,
    #[serde(flatten)]
    pub method: Method,
}

pub fn unmarshal_request(bytes: &[u8]) -> Result<Request, RpcError> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Outbound response envelope; also the shape tests parse replies into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub tsx_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec: Option<i64>,
}

pub fn marshal_result<T: Serialize>(tsx_id: u64, result: &T) -> Result<Vec<u8>, RpcError> {
    let response = Response {
        tsx_id,
        result: Some(serde_json::to_value(result)?),
        ec: None,
    };
    Ok(serde_json::to_vec(&response)?)
}

/// A response with no result payload, only an acknowledged `tsx_id`.
pub fn marshal_ack(tsx_id: u64) -> Result<Vec<u8>, RpcError> {
    Ok(serde_json::to_vec(&Response {
        tsx_id,
        result: None,
        ec: None,
    })?)
}

pub fn marshal_error(tsx_id: u64, ec: i64) -> Vec<u8> {
    serde_json::to_vec(&Response {
        tsx_id,
        result: None,
        ec: Some(ec),
    })
    .expect("error responses always serialize")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResult {
    pub challenge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidAuthResult {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdResult {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelListResult {
    pub is_last: bool,
    pub channels: Vec<ChanInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMetaResult {
    pub channels: Vec<ChanInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDetailResult {
    pub channel: ChanInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostListResult {
    pub is_last: bool,
    pub posts: Vec<PostInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentListResult {
    pub is_last: bool,
    pub comments: Vec<CmtInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResult {
    pub did: String,
    pub connecting_clients: usize,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Server-initiated envelopes; no `tsx_id`, the consumer keys on method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Notification {
    NewPost { post: PostInfo },
    NewComment { comment: CmtInfo },
    NewLike { like: LikeInfo },
    NewSubscription { chan_id: u64, user: UserInfo },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::NewPost { .. } => "new_post",
            Notification::NewComment { .. } => "new_comment",
            Notification::NewLike { .. } => "new_like",
            Notification::NewSubscription { .. } => "new_subscription",
        }
    }
}

pub fn marshal_notification(notification: &Notification) -> Result<Vec<u8>, RpcError> {
    Ok(serde_json::to_vec(notification)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_roundtrips() {
        let request = Request {
            tsx_id: 42,
            method: Method::CreateChannel(CreateChannelParams {
                tk: "token".to_string(),
                name: "news".to_string(),
                intro: "daily".to_string(),
                avatar: vec![1, 2, 3],
            }),
        };
        let bytes = serde_json::to_vec(&request).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["method"], "create_channel");
        assert_eq!(value["tsx_id"], 42);
        assert!(value["params"]["avatar"].is_string());

        let parsed = unmarshal_request(&bytes).unwrap();
        assert_eq!(parsed.tsx_id, 42);
        match parsed.method {
            Method::CreateChannel(params) => {
                assert_eq!(params.name, "news");
                assert_eq!(params.avatar, vec![1, 2, 3]);
            }
            other => panic!("wrong method: {}", other.name()),
        }
    }

    #[test]
    fn optional_fields_default_on_the_wire() {
        let bytes = br#"{"tsx_id":7,"method":"post_like","params":{"tk":"t","chan_id":1,"post_id":2}}"#;
        let parsed = unmarshal_request(bytes).unwrap();
        match parsed.method {
            Method::PostLike(params) => assert_eq!(params.cmt_id, 0),
            other => panic!("wrong method: {}", other.name()),
        }
    }

    #[test]
    fn error_response_carries_code_only() {
        let bytes = marshal_error(9, ERR_NOT_AUTHORIZED);
        let response: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response.tsx_id, 9);
        assert_eq!(response.ec, Some(ERR_NOT_AUTHORIZED));
        assert!(response.result.is_none());
    }

    #[test]
    fn notification_has_no_tsx_id() {
        let notification = Notification::NewSubscription {
            chan_id: 3,
            user: UserInfo {
                uid: 1,
                name: "alice".to_string(),
                did: "did:vly:abc".to_string(),
            },
        };
        let bytes = marshal_notification(&notification).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["method"], "new_subscription");
        assert!(value.get("tsx_id").is_none());
    }

    #[test]
    fn accessibility_table_matches_methods() {
        let anyone = Method::SignIn(SignInParams { doc: String::new() });
        let owner = Method::PublishPost(PublishPostParams {
            tk: String::new(),
            chan_id: 1,
            content: Vec::new(),
        });
        let authed = Method::GetChannels(QueryParams {
            tk: String::new(),
            qc: QueryCriteria::default(),
        });
        assert_eq!(anyone.accessibility(), Accessibility::Anyone);
        assert_eq!(owner.accessibility(), Accessibility::Owner);
        assert_eq!(authed.accessibility(), Accessibility::Authenticated);
    }
}
