//! Per-component request lifecycle and the transport seam.

use super::{reconcile::ReconcileMode, ClientError};
use crate::protocol::{WireRequest, WireResponse};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Sends component calls. Completions are reported back through [`Page::complete`](super::Page::complete).
pub trait Transport {
	fn send(&mut self, request: WireRequest) -> RequestId;

	/// Cancels an in-flight request. Its completion, if still reported, is ignored.
	fn abort(&mut self, id: RequestId);

	/// Completions that arrived since the last poll, for transports that queue them.
	fn poll(&mut self) -> Vec<(RequestId, Result<WireResponse, ClientError>)> {
		vec![]
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
	Idle,
	Pending,
	Reconciling,
	Aborted,
}

/// What to do once a request resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending<N> {
	pub id: RequestId,
	pub mode: ReconcileMode,
	/// Reset model controls after success.
	pub clear: bool,
	/// Attribute values to restore when loading ends: `(node, name, previous)`.
	pub loading: Vec<(N, String, Option<String>)>,
}

/// Last-write-wins request state machine of one component.
#[derive(Debug)]
pub struct Dispatcher<N> {
	state: DispatchState,
	pending: Option<Pending<N>>,
}

impl<N> Default for Dispatcher<N> {
	fn default() -> Self {
		Self {
			state: DispatchState::Idle,
			pending: None,
		}
	}
}

impl<N> Dispatcher<N> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn state(&self) -> DispatchState {
		self.state
	}

	/// The request currently in flight.
	#[must_use]
	pub fn in_flight(&self) -> Option<RequestId> {
		self.pending.as_ref().map(|pending| pending.id)
	}

	/// Supersedes any in-flight request, which is returned so the caller can abort it and undo its loading state.
	pub fn begin(&mut self, pending: Pending<N>) -> Option<Pending<N>> {
		let superseded = self.pending.take();
		if let Some(superseded) = &superseded {
			self.state = DispatchState::Aborted;
			trace!(aborted = superseded.id.0, "Superseded in-flight request.");
		}
		trace!(id = pending.id.0, "Request pending.");
		self.pending = Some(pending);
		self.state = DispatchState::Pending;
		superseded
	}

	/// Claims the completion of `id`. Stale completions yield [`None`] and change nothing.
	pub fn resolve(&mut self, id: RequestId) -> Option<Pending<N>> {
		if self.in_flight() != Some(id) {
			trace!(id = id.0, "Ignoring stale completion.");
			return None;
		}
		self.state = DispatchState::Reconciling;
		self.pending.take()
	}

	/// Drops the in-flight request without a successor.
	pub fn abort(&mut self) -> Option<Pending<N>> {
		let aborted = self.pending.take();
		if aborted.is_some() {
			self.state = DispatchState::Aborted;
		}
		self.settle();
		aborted
	}

	pub fn settle(&mut self) {
		self.state = DispatchState::Idle;
	}
}
