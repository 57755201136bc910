//! Scripted in-memory collaborators for exercising the lifecycle policies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use provider::{
    BoxFuture, CallError, CallResult, IdentityProvider, Profile, ResourceApi, ResourceRequest,
    ResourceResponse, TokenSet,
};

fn next<T>(queue: &Mutex<VecDeque<CallResult<T>>>) -> CallResult<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(CallError::Transport("unscripted call".into())))
}

pub(crate) fn tokens(suffix: &str) -> TokenSet {
    TokenSet {
        access_token: format!("at_{suffix}"),
        refresh_token: format!("rt_{suffix}"),
        expires_at: Some(1_735_500_000_000),
    }
}

pub(crate) fn profile(id: &str) -> Profile {
    Profile {
        id: id.into(),
        display_name: Some(format!("User {id}")),
        mail: None,
        user_principal_name: None,
    }
}

pub(crate) fn ok_json(body: &str) -> CallResult<ResourceResponse> {
    Ok(ResourceResponse {
        status: 200,
        content_type: Some("application/json".into()),
        body: Bytes::copy_from_slice(body.as_bytes()),
    })
}

#[derive(Default)]
pub(crate) struct FakeIdp {
    exchanges: Mutex<VecDeque<CallResult<TokenSet>>>,
    refreshes: Mutex<VecDeque<CallResult<TokenSet>>>,
    exchange_calls: AtomicUsize,
    refreshed_with: Mutex<Vec<String>>,
}

impl FakeIdp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_exchange(self, result: CallResult<TokenSet>) -> Self {
        self.exchanges.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn on_refresh(self, result: CallResult<TokenSet>) -> Self {
        self.refreshes.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refreshed_with.lock().unwrap().len()
    }

    /// Refresh tokens passed to `refresh`, in call order.
    pub(crate) fn refreshed_with(&self) -> Vec<String> {
        self.refreshed_with.lock().unwrap().clone()
    }
}

impl IdentityProvider for FakeIdp {
    fn id(&self) -> &str {
        "fake"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("https://idp.test/authorize?state={state}")
    }

    fn exchange_code<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, CallResult<TokenSet>> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { next(&self.exchanges) })
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, CallResult<TokenSet>> {
        self.refreshed_with
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        Box::pin(async move { next(&self.refreshes) })
    }
}

#[derive(Default)]
pub(crate) struct FakeResources {
    profiles: Mutex<VecDeque<CallResult<Profile>>>,
    resources: Mutex<VecDeque<CallResult<ResourceResponse>>>,
    resource_tokens: Mutex<Vec<String>>,
}

impl FakeResources {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_profile(self, result: CallResult<Profile>) -> Self {
        self.profiles.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn on_resource(self, result: CallResult<ResourceResponse>) -> Self {
        self.resources.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn resource_calls(&self) -> usize {
        self.resource_tokens.lock().unwrap().len()
    }

    /// Access tokens presented to `fetch_resource`, in call order.
    pub(crate) fn resource_tokens(&self) -> Vec<String> {
        self.resource_tokens.lock().unwrap().clone()
    }
}

impl ResourceApi for FakeResources {
    fn fetch_profile<'a>(&'a self, _access_token: &'a str) -> BoxFuture<'a, CallResult<Profile>> {
        Box::pin(async move { next(&self.profiles) })
    }

    fn fetch_resource<'a>(
        &'a self,
        access_token: &'a str,
        _request: &'a ResourceRequest,
    ) -> BoxFuture<'a, CallResult<ResourceResponse>> {
        self.resource_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        Box::pin(async move { next(&self.resources) })
    }
}
