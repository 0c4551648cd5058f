//! FIFO 通道策略。
//!
//! 生产端由会话内部持有，消费端 [`ChannelReceiver`] 交还调用方。
//! 关闭生产端即关闭通道：接收端读完缓冲后得到 `None`，不会永久阻塞。

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tracing::warn;

use super::CloseReason;

/// 关闭钩子，通道关闭时恰好调用一次。
type CloseHook = Box<dyn FnOnce(CloseReason) + Send>;

/// 通道策略的配置：有界或无界，可附带关闭钩子。
#[derive(Default)]
pub struct Channel {
    capacity: Option<usize>,
    on_close: Option<CloseHook>,
}

impl Channel {
    /// 无界 FIFO。
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// 有界 FIFO；容量为 0 时按 1 处理。队列满时新值被丢弃，交付线程不会阻塞。
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            on_close: None,
        }
    }

    /// 设置关闭钩子：生产端关闭后调用一次，此时接收端已能观察到 [`ChannelReceiver::close_reason`]。
    pub fn on_close<G>(mut self, hook: G) -> Self
    where
        G: FnOnce(CloseReason) + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(super) fn split<T>(self) -> (ChannelSender<T>, ChannelReceiver<T>) {
        let reason = Arc::new(OnceLock::new());
        let (tx, rx) = match self.capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (Tx::Bounded(tx), Rx::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Tx::Unbounded(tx), Rx::Unbounded(rx))
            }
        };
        let sender = ChannelSender {
            tx: Mutex::new(Some(tx)),
            reason: Arc::clone(&reason),
            on_close: Mutex::new(self.on_close),
        };
        (sender, ChannelReceiver { rx, reason })
    }
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity)
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

enum Tx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

enum Rx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

pub(super) struct ChannelSender<T> {
    tx: Mutex<Option<Tx<T>>>,
    reason: Arc<OnceLock<CloseReason>>,
    on_close: Mutex<Option<CloseHook>>,
}

impl<T> ChannelSender<T> {
    pub(super) fn send(&self, value: T) -> bool {
        // 被拒收的值在释放锁之后才析构：`Query` 的析构会回调会话。
        let rejected = {
            let guard = self.tx.lock();
            match guard.as_ref() {
                None => Some(value),
                Some(Tx::Unbounded(tx)) => tx.send(value).err().map(|err| err.0),
                Some(Tx::Bounded(tx)) => match tx.try_send(value) {
                    Ok(()) => None,
                    Err(TrySendError::Full(value)) => {
                        warn!(capacity = tx.max_capacity(), "bounded channel full, value dropped");
                        Some(value)
                    }
                    Err(TrySendError::Closed(value)) => Some(value),
                },
            }
        };
        match rejected {
            Some(value) => {
                drop(value);
                false
            }
            None => true,
        }
    }

    pub(super) fn close(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        let tx = self.tx.lock().take();
        drop(tx);
        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook(reason);
        }
    }
}

/// 通道策略交还给调用方的接收端。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `recv` 在有数据时立即返回，生产端关闭且缓冲读空后返回 `None`；
///   - [`is_closed_for_receive`](Self::is_closed_for_receive) 在“已关闭且无剩余数据”时为真；
///   - [`close_reason`](Self::close_reason) 在关闭后报告原因，可区分超时与正常完成。
/// - **风险 (Trade-offs)**：`blocking_recv` 不能在异步上下文中调用，否则 tokio 会 panic。
pub struct ChannelReceiver<T> {
    rx: Rx<T>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl<T> ChannelReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.try_recv(),
            Rx::Unbounded(rx) => rx.try_recv(),
        }
    }

    pub fn blocking_recv(&mut self) -> Option<T> {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.blocking_recv(),
            Rx::Unbounded(rx) => rx.blocking_recv(),
        }
    }

    /// 生产端是否已关闭（缓冲中可能仍有数据）。
    pub fn is_closed(&self) -> bool {
        match &self.rx {
            Rx::Bounded(rx) => rx.is_closed(),
            Rx::Unbounded(rx) => rx.is_closed(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.rx {
            Rx::Bounded(rx) => rx.is_empty(),
            Rx::Unbounded(rx) => rx.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.rx {
            Rx::Bounded(rx) => rx.len(),
            Rx::Unbounded(rx) => rx.len(),
        }
    }

    pub fn is_closed_for_receive(&self) -> bool {
        self.is_closed() && self.is_empty()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }
}

impl<T> core::fmt::Debug for ChannelReceiver<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("reason", &self.close_reason())
            .finish()
    }
}
