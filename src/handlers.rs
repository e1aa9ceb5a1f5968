//! Request dispatcher and per-method handlers.
//!
//! Every inbound envelope runs through the same gate sequence the service
//! has always had: drop silently while the server DID is not ready, resolve
//! the access token for anything beyond sign-in, require the owner identity
//! for owner-only methods, then check method preconditions in order. The
//! first failure short-circuits with an error response carrying the caller's
//! `tsx_id`; notifications are only emitted after a committed mutation.
//!
//! Handlers run to completion one at a time on the dispatch task, so the
//! in-memory indexes are mutated without locks.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::auth::AuthCore;
use crate::config::{Config, POST_ID_START};
use crate::feeds::FeedsIndex;
use crate::msgq::MsgQueue;
use crate::rpc::{
    self, Accessibility, ChanInfo, ChannelDetailResult, ChannelIdParams, ChannelListResult,
    ChannelMetaResult, CmtInfo, CommentListResult, CommentsQueryParams, CreateChannelParams,
    DidAuthParams, DidAuthResult, IdResult, LikeInfo, LikeParams, Method, Notification,
    PostCommentParams, PostInfo, PostListResult, PostsQueryParams, PublishPostParams,
    QueryParams, Request, SignInParams, SignInResult, StatsResult, TokenParams, UserInfo,
    ERR_ACCESS_TOKEN_EXP, ERR_ALREADY_EXISTS, ERR_INTERNAL_ERROR, ERR_NOT_AUTHORIZED,
    ERR_NOT_EXIST, ERR_WRONG_STATE,
};
use crate::storage::{Storage, StorageError};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The feeds core: storage, auth, in-memory indexes, and outbound queues,
/// driven by one dispatch task.
pub struct ServerCore {
    storage: Storage,
    auth: AuthCore,
    feeds: FeedsIndex,
    msgq: MsgQueue,
    owner: UserInfo,
    max_content_len: usize,
    connected: usize,
}

impl ServerCore {
    pub fn new(cfg: &Config, mut storage: Storage, auth: AuthCore) -> Result<Self, StorageError> {
        let owner = storage.upsert_user(&cfg.owner_did, &cfg.owner_name)?;
        let feeds = FeedsIndex::load(&storage)?;
        Ok(ServerCore {
            storage,
            auth,
            feeds,
            msgq: MsgQueue::new(cfg.max_queued),
            owner,
            max_content_len: cfg.max_content_len(),
            connected: 0,
        })
    }

    pub fn auth_mut(&mut self) -> &mut AuthCore {
        &mut self.auth
    }

    pub fn msgq_mut(&mut self) -> &mut MsgQueue {
        &mut self.msgq
    }

    pub fn feeds(&self) -> &FeedsIndex {
        &self.feeds
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn peer_connected(&mut self, node_id: &str) {
        self.connected += 1;
        vlogi!("core: peer connected {}", crate::logging::node_id(node_id));
    }

    /// Transport disconnect: release notification state and drop the queue.
    pub fn peer_disconnected(&mut self, node_id: &str) {
        self.connected = self.connected.saturating_sub(1);
        self.feeds.deactivate(node_id);
        self.msgq.remove(node_id);
        vlogi!("core: peer disconnected {}", crate::logging::node_id(node_id));
    }

    /// Entry point for one reassembled section: unmarshal the envelope and
    /// dispatch. A non-empty body substitutes for the content field of the
    /// mutating methods, which is how bulk payloads arrive.
    pub fn handle_frame(&mut self, from: &str, head: &[u8], body: Option<Vec<u8>>) {
        let mut request = match rpc::unmarshal_request(head) {
            Ok(request) => request,
            Err(e) => {
                vloge!("core: dropping unparseable envelope from {}: {e}",
                    crate::logging::node_id(from));
                return;
            }
        };

        if let Some(bytes) = body {
            if !bytes.is_empty() {
                let method_name = request.method.name();
                match &mut request.method {
                    Method::PublishPost(params) if params.content.is_empty() => {
                        params.content = bytes;
                    }
                    Method::PostComment(params) if params.content.is_empty() => {
                        params.content = bytes;
                    }
                    Method::CreateChannel(params) if params.avatar.is_empty() => {
                        params.avatar = bytes;
                    }
                    _ => {
                        vlogw!("core: ignoring {} byte body on {method_name}", bytes.len());
                    }
                }
            }
        }

        self.handle_request(from, request);
    }

    pub fn handle_request(&mut self, from: &str, request: Request) {
        vlogd!(
            "core: received {} request from {} (tsx_id: {})",
            request.method.name(),
            crate::logging::node_id(from),
            request.tsx_id
        );

        if !self.auth.is_ready() {
            vloge!("core: feeds DID is not ready, ignoring request");
            return;
        }

        let tsx_id = request.tsx_id;
        match request.method {
            Method::SignIn(params) => self.sign_in(from, tsx_id, params),
            Method::DidAuth(params) => self.did_auth(from, tsx_id, params),
            Method::CreateChannel(params) => self.create_channel(from, tsx_id, params),
            Method::PublishPost(params) => self.publish_post(from, tsx_id, params),
            Method::PostComment(params) => self.post_comment(from, tsx_id, params),
            Method::PostLike(params) => self.post_like(from, tsx_id, params),
            Method::PostUnlike(params) => self.post_unlike(from, tsx_id, params),
            Method::SubscribeChannel(params) => self.subscribe_channel(from, tsx_id, params),
            Method::UnsubscribeChannel(params) => self.unsubscribe_channel(from, tsx_id, params),
            Method::EnableNotification(params) => self.enable_notification(from, tsx_id, params),
            Method::GetMyChannels(params) => self.get_my_channels(from, tsx_id, params),
            Method::GetMyChannelsMetadata(params) => {
                self.get_my_channels_metadata(from, tsx_id, params)
            }
            Method::GetChannels(params) => self.get_channels(from, tsx_id, params),
            Method::GetChannelDetail(params) => self.get_channel_detail(from, tsx_id, params),
            Method::GetSubscribedChannels(params) => {
                self.get_subscribed_channels(from, tsx_id, params)
            }
            Method::GetPosts(params) => self.get_posts(from, tsx_id, params),
            Method::GetLikedPosts(params) => self.get_liked_posts(from, tsx_id, params),
            Method::GetComments(params) => self.get_comments(from, tsx_id, params),
            Method::GetStatistics(params) => self.get_statistics(from, tsx_id, params),
        }
    }

    // -----------------------------------------------------------------------
    // Reply and notification plumbing
    // -----------------------------------------------------------------------

    fn reply<T: Serialize>(&mut self, from: &str, tsx_id: u64, result: &T) {
        match rpc::marshal_result(tsx_id, result) {
            Ok(bytes) => self.msgq.enqueue(from, bytes),
            Err(e) => vloge!("core: marshalling response failed: {e}"),
        }
    }

    fn reply_ack(&mut self, from: &str, tsx_id: u64) {
        match rpc::marshal_ack(tsx_id) {
            Ok(bytes) => self.msgq.enqueue(from, bytes),
            Err(e) => vloge!("core: marshalling response failed: {e}"),
        }
    }

    fn reply_err(&mut self, from: &str, tsx_id: u64, ec: i64) {
        self.msgq.enqueue(from, rpc::marshal_error(tsx_id, ec));
    }

    /// Fan a notification out to the owner's notification node (when set)
    /// and every active subscriber of the channel.
    fn notify_channel(&mut self, chan_id: u64, notification: &Notification) {
        let bytes = match rpc::marshal_notification(notification) {
            Ok(bytes) => bytes,
            Err(e) => {
                vloge!("core: marshalling notification failed: {e}");
                return;
            }
        };
        if let Some(owner_node) = self.feeds.owner_notif_node.clone() {
            vlogd!(
                "core: sending {} notification to {}",
                notification.name(),
                crate::logging::node_id(&owner_node)
            );
            self.msgq.enqueue(&owner_node, bytes.clone());
        }
        for node in self.feeds.active_nodes_of(chan_id) {
            vlogd!(
                "core: sending {} notification to {}",
                notification.name(),
                crate::logging::node_id(&node)
            );
            self.msgq.enqueue(&node, bytes.clone());
        }
    }

    /// Owner-only notification (new subscriptions).
    fn notify_owner(&mut self, notification: &Notification) {
        let Some(owner_node) = self.feeds.owner_notif_node.clone() else {
            return;
        };
        match rpc::marshal_notification(notification) {
            Ok(bytes) => {
                vlogd!(
                    "core: sending {} notification to {}",
                    notification.name(),
                    crate::logging::node_id(&owner_node)
                );
                self.msgq.enqueue(&owner_node, bytes);
            }
            Err(e) => vloge!("core: marshalling notification failed: {e}"),
        }
    }

    /// Resolve the access token to a user, enforcing the method's
    /// accessibility. Replies with the appropriate error and returns None on
    /// failure.
    fn gate(
        &mut self,
        from: &str,
        tsx_id: u64,
        token: &str,
        access: Accessibility,
    ) -> Option<UserInfo> {
        let info = match self.auth.verify_access_token(token) {
            Ok(info) => info,
            Err(e) => {
                vloge!("core: invalid access token: {e}");
                self.reply_err(from, tsx_id, ERR_ACCESS_TOKEN_EXP);
                return None;
            }
        };
        let user = match self.storage.upsert_user(&info.user_did, &info.name) {
            Ok(user) => user,
            Err(e) => {
                vloge!("core: resolving user failed: {e}");
                self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
                return None;
            }
        };
        if access == Accessibility::Owner && user.uid != self.owner.uid {
            vloge!("core: owner method invoked by non-owner {}", user.did);
            self.reply_err(from, tsx_id, ERR_NOT_AUTHORIZED);
            return None;
        }
        Some(user)
    }

    // -----------------------------------------------------------------------
    // Auth methods
    // -----------------------------------------------------------------------

    fn sign_in(&mut self, from: &str, tsx_id: u64, params: SignInParams) {
        match self.auth.sign_in(&params.doc) {
            Ok(challenge) => self.reply(from, tsx_id, &SignInResult { challenge }),
            Err(e) => {
                vloge!("core: sign_in failed: {e}");
                self.reply_err(from, tsx_id, e.code());
            }
        }
    }

    fn did_auth(&mut self, from: &str, tsx_id: u64, params: DidAuthParams) {
        match self.auth.did_auth(&params.vp) {
            Ok(access_token) => self.reply(from, tsx_id, &DidAuthResult { access_token }),
            Err(e) => {
                vloge!("core: did_auth failed: {e}");
                self.reply_err(from, tsx_id, e.code());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Content methods
    // -----------------------------------------------------------------------

    fn create_channel(&mut self, from: &str, tsx_id: u64, params: CreateChannelParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Owner) else {
            return;
        };

        if self.feeds.has_channel_name(&params.name) {
            vloge!("core: creating an existing channel");
            return self.reply_err(from, tsx_id, ERR_ALREADY_EXISTS);
        }

        let now = now_secs();
        let info = ChanInfo {
            chan_id: self.feeds.next_chan_id(),
            name: params.name,
            intro: params.intro,
            owner: self.owner.clone(),
            created_at: now,
            upd_at: now,
            subs: 0,
            next_post_id: POST_ID_START,
            avatar: params.avatar,
        };

        if let Err(e) = self.storage.create_channel(&info) {
            vloge!("core: adding channel to database failed: {e}");
            let ec = match e {
                StorageError::AlreadyExists(_) => ERR_ALREADY_EXISTS,
                _ => ERR_INTERNAL_ERROR,
            };
            return self.reply_err(from, tsx_id, ec);
        }

        let id = info.chan_id;
        self.feeds.insert_channel(info);
        vlogi!("core: channel [{id}] created");
        self.reply(from, tsx_id, &IdResult { id });
    }

    fn publish_post(&mut self, from: &str, tsx_id: u64, params: PublishPostParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Owner) else {
            return;
        };

        let Some(channel) = self.feeds.channel(params.chan_id) else {
            vloge!("core: publishing post on non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        };

        let now = now_secs();
        let post = PostInfo {
            chan_id: params.chan_id,
            post_id: channel.info.next_post_id,
            created_at: now,
            upd_at: now,
            content: params.content,
            cmts: 0,
            likes: 0,
        };

        if let Err(e) = self.storage.add_post(&post) {
            vloge!("core: inserting post into database failed: {e}");
            return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
        }

        let channel = self
            .feeds
            .channel_mut(params.chan_id)
            .expect("channel checked above");
        channel.info.next_post_id += 1;
        channel.info.upd_at = now;

        vlogi!("core: post [{}] on channel [{}] created", post.post_id, post.chan_id);
        self.reply(from, tsx_id, &IdResult { id: post.post_id });

        self.notify_channel(post.chan_id, &Notification::NewPost { post });
    }

    fn post_comment(&mut self, from: &str, tsx_id: u64, params: PostCommentParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        let Some(channel) = self.feeds.channel(params.chan_id) else {
            vloge!("core: posting comment on non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        };
        if params.post_id >= channel.info.next_post_id {
            vloge!("core: posting comment on non-existent post");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }
        if params.cmt_id != 0 {
            match self
                .storage
                .comment_exists(params.chan_id, params.post_id, params.cmt_id)
            {
                Ok(true) => {}
                Ok(false) => {
                    vloge!("core: replying to non-existent comment");
                    return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
                }
                Err(e) => {
                    vloge!("core: checking comment failed: {e}");
                    return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
                }
            }
        }

        let now = now_secs();
        let mut comment = CmtInfo {
            chan_id: params.chan_id,
            post_id: params.post_id,
            cmt_id: 0,
            reply_to_cmt: params.cmt_id,
            user,
            content: params.content,
            created_at: now,
            upd_at: now,
            likes: 0,
        };

        match self.storage.add_comment(&comment) {
            Ok(id) => comment.cmt_id = id,
            Err(e) => {
                vloge!("core: adding comment to database failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }

        if let Some(channel) = self.feeds.channel_mut(params.chan_id) {
            channel.info.upd_at = now;
        }

        vlogi!(
            "core: comment [{}] on channel [{}] post [{}] created",
            comment.cmt_id, comment.chan_id, comment.post_id
        );
        self.reply(from, tsx_id, &IdResult { id: comment.cmt_id });

        self.notify_channel(params.chan_id, &Notification::NewComment { comment });
    }

    fn post_like(&mut self, from: &str, tsx_id: u64, params: LikeParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        let Some(channel) = self.feeds.channel(params.chan_id) else {
            vloge!("core: posting like on non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        };
        if params.post_id >= channel.info.next_post_id {
            vloge!("core: posting like on non-existent post");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }
        if params.cmt_id != 0 {
            match self
                .storage
                .comment_exists(params.chan_id, params.post_id, params.cmt_id)
            {
                Ok(true) => {}
                Ok(false) => {
                    vloge!("core: posting like on non-existent comment");
                    return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
                }
                Err(e) => {
                    vloge!("core: checking comment failed: {e}");
                    return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
                }
            }
        }

        match self
            .storage
            .like_exists(user.uid, params.chan_id, params.post_id, params.cmt_id)
        {
            Ok(false) => {}
            Ok(true) => {
                vloge!("core: posting like on liked subject");
                return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
            }
            Err(e) => {
                vloge!("core: checking like failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }

        let total_cnt = match self.storage.add_like(
            user.uid,
            params.chan_id,
            params.post_id,
            params.cmt_id,
            now_secs(),
        ) {
            Ok(total) => total,
            Err(e) => {
                vloge!("core: adding like to database failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        };

        vlogi!(
            "core: like on channel [{}] post [{}] comment [{}] by [{}]",
            params.chan_id, params.post_id, params.cmt_id, user.did
        );
        self.reply_ack(from, tsx_id);

        let like = LikeInfo {
            chan_id: params.chan_id,
            post_id: params.post_id,
            cmt_id: params.cmt_id,
            user,
            total_cnt,
        };
        self.notify_channel(params.chan_id, &Notification::NewLike { like });
    }

    fn post_unlike(&mut self, from: &str, tsx_id: u64, params: LikeParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        if self.feeds.channel(params.chan_id).is_none() {
            vloge!("core: posting unlike on non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }

        match self
            .storage
            .like_exists(user.uid, params.chan_id, params.post_id, params.cmt_id)
        {
            Ok(true) => {}
            Ok(false) => {
                vloge!("core: posting unlike on unliked subject");
                return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
            }
            Err(e) => {
                vloge!("core: checking like failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }

        if let Err(e) =
            self.storage
                .remove_like(user.uid, params.chan_id, params.post_id, params.cmt_id)
        {
            vloge!("core: removing like from database failed: {e}");
            return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
        }

        vlogi!(
            "core: unlike on channel [{}] post [{}] comment [{}] by [{}]",
            params.chan_id, params.post_id, params.cmt_id, user.did
        );
        self.reply_ack(from, tsx_id);
    }

    fn subscribe_channel(&mut self, from: &str, tsx_id: u64, params: ChannelIdParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        if self.feeds.channel(params.id).is_none() {
            vloge!("core: subscribing non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }

        match self.storage.is_subscriber(user.uid, params.id) {
            Ok(false) => {}
            Ok(true) => {
                vloge!("core: subscribing subscribed channel");
                return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
            }
            Err(e) => {
                vloge!("core: checking subscription failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }

        if let Err(e) = self.storage.add_subscription(user.uid, params.id, now_secs()) {
            vloge!("core: adding subscription to database failed: {e}");
            return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
        }

        if let Some(suber_id) = self.feeds.suber_id(from) {
            self.feeds.link(suber_id, params.id);
        }
        if let Some(channel) = self.feeds.channel_mut(params.id) {
            channel.info.subs += 1;
        }

        vlogi!("core: [{}] subscribed to channel [{}]", user.did, params.id);
        self.reply_ack(from, tsx_id);

        self.notify_owner(&Notification::NewSubscription {
            chan_id: params.id,
            user,
        });
    }

    fn unsubscribe_channel(&mut self, from: &str, tsx_id: u64, params: ChannelIdParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        if self.feeds.channel(params.id).is_none() {
            vloge!("core: unsubscribing non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }

        match self.storage.is_subscriber(user.uid, params.id) {
            Ok(true) => {}
            Ok(false) => {
                vloge!("core: unsubscribing non-existent subscription");
                return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
            }
            Err(e) => {
                vloge!("core: checking subscription failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }

        if let Err(e) = self.storage.remove_subscription(user.uid, params.id) {
            vloge!("core: removing subscription from database failed: {e}");
            return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
        }

        self.feeds.unlink_node(from, params.id);
        if let Some(channel) = self.feeds.channel_mut(params.id) {
            channel.info.subs = channel.info.subs.saturating_sub(1);
        }

        vlogi!("core: [{}] unsubscribed channel [{}]", user.did, params.id);
        self.reply_ack(from, tsx_id);
    }

    fn enable_notification(&mut self, from: &str, tsx_id: u64, params: TokenParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };

        if user.uid == self.owner.uid {
            if self.feeds.owner_notif_node.is_some() {
                vloge!("core: owner already enabled notification");
                return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
            }
            self.feeds.owner_notif_node = Some(from.to_string());
            vlogi!("core: owner notifications -> {}", crate::logging::node_id(from));
            return self.reply_ack(from, tsx_id);
        }

        if self.feeds.has_suber(from) {
            vloge!("core: already enabled notification");
            return self.reply_err(from, tsx_id, ERR_WRONG_STATE);
        }

        let subscribed = match self
            .storage
            .query_subscribed_channels(user.uid, &Default::default())
        {
            Ok(channels) => channels,
            Err(e) => {
                vloge!("core: getting subscribed channels failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        };

        let suber_id = self.feeds.activate_suber(from);
        for info in &subscribed {
            vlogd!(
                "core: enabling notification of channel [{}] for [{}]",
                info.chan_id, user.did
            );
            self.feeds.link(suber_id, info.chan_id);
        }

        self.reply_ack(from, tsx_id);
    }

    // -----------------------------------------------------------------------
    // Listing methods
    // -----------------------------------------------------------------------

    fn send_channel_chunks(&mut self, from: &str, tsx_id: u64, channels: Vec<ChanInfo>) {
        for (chunk, is_last) in chunk_items(channels, self.max_content_len, |c| c.avatar.len()) {
            self.reply(
                from,
                tsx_id,
                &ChannelListResult {
                    is_last,
                    channels: chunk,
                },
            );
        }
    }

    fn get_my_channels(&mut self, from: &str, tsx_id: u64, params: QueryParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Owner) else {
            return;
        };
        match self.storage.query_channels(&params.qc) {
            Ok(channels) => self.send_channel_chunks(from, tsx_id, channels),
            Err(e) => {
                vloge!("core: getting owned channels failed: {e}");
                self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }
    }

    fn get_my_channels_metadata(&mut self, from: &str, tsx_id: u64, params: QueryParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Owner) else {
            return;
        };
        match self.storage.query_channels(&params.qc) {
            Ok(channels) => self.reply(from, tsx_id, &ChannelMetaResult { channels }),
            Err(e) => {
                vloge!("core: getting owned channels metadata failed: {e}");
                self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }
    }

    fn get_channels(&mut self, from: &str, tsx_id: u64, params: QueryParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        match self.storage.query_channels(&params.qc) {
            Ok(channels) => self.send_channel_chunks(from, tsx_id, channels),
            Err(e) => {
                vloge!("core: getting channels failed: {e}");
                self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }
    }

    fn get_channel_detail(&mut self, from: &str, tsx_id: u64, params: ChannelIdParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        let Some(channel) = self.feeds.channel(params.id) else {
            vloge!("core: getting detail on non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        };
        let channel = channel.info.clone();
        self.reply(from, tsx_id, &ChannelDetailResult { channel });
    }

    fn get_subscribed_channels(&mut self, from: &str, tsx_id: u64, params: QueryParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        match self.storage.query_subscribed_channels(user.uid, &params.qc) {
            Ok(channels) => self.send_channel_chunks(from, tsx_id, channels),
            Err(e) => {
                vloge!("core: getting subscribed channels failed: {e}");
                self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        }
    }

    fn get_posts(&mut self, from: &str, tsx_id: u64, params: PostsQueryParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        if self.feeds.channel(params.chan_id).is_none() {
            vloge!("core: getting posts from non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }
        let posts = match self.storage.query_posts(params.chan_id, &params.qc) {
            Ok(posts) => posts,
            Err(e) => {
                vloge!("core: getting posts failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        };
        for (chunk, is_last) in chunk_items(posts, self.max_content_len, |p| p.content.len()) {
            self.reply(
                from,
                tsx_id,
                &PostListResult {
                    is_last,
                    posts: chunk,
                },
            );
        }
    }

    fn get_liked_posts(&mut self, from: &str, tsx_id: u64, params: QueryParams) {
        let Some(user) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        let posts = match self.storage.query_liked_posts(user.uid, &params.qc) {
            Ok(posts) => posts,
            Err(e) => {
                vloge!("core: getting liked posts failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        };
        for (chunk, is_last) in chunk_items(posts, self.max_content_len, |p| p.content.len()) {
            self.reply(
                from,
                tsx_id,
                &PostListResult {
                    is_last,
                    posts: chunk,
                },
            );
        }
    }

    fn get_comments(&mut self, from: &str, tsx_id: u64, params: CommentsQueryParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        let Some(channel) = self.feeds.channel(params.chan_id) else {
            vloge!("core: getting comments from non-existent channel");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        };
        if params.post_id >= channel.info.next_post_id {
            vloge!("core: getting comments from non-existent post");
            return self.reply_err(from, tsx_id, ERR_NOT_EXIST);
        }
        let comments = match self
            .storage
            .query_comments(params.chan_id, params.post_id, &params.qc)
        {
            Ok(comments) => comments,
            Err(e) => {
                vloge!("core: getting comments failed: {e}");
                return self.reply_err(from, tsx_id, ERR_INTERNAL_ERROR);
            }
        };
        for (chunk, is_last) in chunk_items(comments, self.max_content_len, |c| c.content.len()) {
            self.reply(
                from,
                tsx_id,
                &CommentListResult {
                    is_last,
                    comments: chunk,
                },
            );
        }
    }

    fn get_statistics(&mut self, from: &str, tsx_id: u64, params: TokenParams) {
        let Some(_) = self.gate(from, tsx_id, &params.tk, Accessibility::Authenticated) else {
            return;
        };
        let did = self
            .auth
            .server_did()
            .map(|did| did.as_str().to_string())
            .unwrap_or_default();
        let result = StatsResult {
            did,
            connecting_clients: self.connected,
        };
        self.reply(from, tsx_id, &result);
    }
}

/// Split an ordered result set into response chunks under `budget` bytes of
/// item payload each. Every chunk marks whether it carries the final item;
/// an empty set yields one empty final chunk.
fn chunk_items<T>(
    items: Vec<T>,
    budget: usize,
    size_of: impl Fn(&T) -> usize,
) -> Vec<(Vec<T>, bool)> {
    if items.is_empty() {
        return vec![(Vec::new(), true)];
    }

    let total = items.len();
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut left = budget;

    let mut iter = items.into_iter().enumerate().peekable();
    while let Some((i, item)) = iter.next() {
        left = left.saturating_sub(size_of(&item));
        current.push(item);

        let is_last = i == total - 1;
        let next_overflows = iter
            .peek()
            .map(|(_, next)| size_of(next) > left)
            .unwrap_or(false);
        if left == 0 || is_last || next_overflows {
            chunks.push((std::mem::take(&mut current), is_last));
            left = budget;
        }
    }

    chunks
}
