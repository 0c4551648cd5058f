//! # 消费抽象：回调、处理器对象与通道
//!
//! ## 核心意图（Why）
//! - 查询（`Query`）与应答（`Reply`）都以“值流”的形式交付给调用方，调用方可以任选一种消费方式；
//! - Queryable 与 Session 的逻辑只面向内部的 [`Sink`] 编写一次：`emit` 交付一个值，`finish` 宣告流结束。
//!
//! ## 三种策略（What）
//! - [`Callback`]：在交付线程上同步调用闭包，无缓冲、无背压；闭包不得长时间阻塞；
//! - [`Stateful`]：包装实现 [`Handler`] 的对象，交付语义同回调，额外通过 `receiver()` 把累积状态交还调用方；
//! - [`Channel`]：值被推入有界或无界 FIFO，由 [`ChannelReceiver`] 异步拉取；流结束后接收端先读完剩余数据，
//!   随后观察到流结束而不会永久阻塞；同样可附带一次性的关闭钩子。
//!
//! ## 共同契约
//! - 每个 Queryable / `get` 恰好绑定一种策略；
//! - `finish` 幂等，`on_close` 至多触发一次，并且携带 [`CloseReason`]；
//! - `finish` 之后的 `emit` 被静默丢弃并返回 `false`。

mod channel;

pub use channel::{Channel, ChannelReceiver};

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use channel::ChannelSender;

/// 值流结束的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// 路由层报告所有匹配的 Queryable 都已结束应答。
    Completed,
    /// `get` 的截止时间已到。
    Timeout,
    /// 所属 Queryable 被撤销。
    Undeclared,
    /// 所属会话被关闭。
    SessionClosed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::Completed => "completed",
            CloseReason::Timeout => "timeout",
            CloseReason::Undeclared => "undeclared",
            CloseReason::SessionClosed => "session-closed",
        };
        f.write_str(text)
    }
}

/// 有状态的处理器对象。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `handle` 在交付线程上同步调用，可能被多个线程并发调用，状态需自行做内部可变性；
///   - `receiver` 在绑定时调用一次，其返回值作为 Queryable / `get` 的接收端交还调用方；
///   - `on_close` 至多调用一次，发生在所有已开始的 `handle` 返回之后。
pub trait Handler<T>: Send + Sync + 'static {
    type Receiver;

    fn handle(&self, value: T);

    fn receiver(&self) -> Self::Receiver;

    fn on_close(&self, _reason: CloseReason) {}
}

/// 以 [`Handler`] 对象作为消费策略。
#[derive(Debug)]
pub struct Stateful<H>(pub H);

/// 回调消费策略，可附带一次性的关闭钩子。
pub struct Callback<T> {
    call: Box<dyn Fn(T) + Send + Sync>,
    on_close: Option<Box<dyn FnOnce(CloseReason) + Send>>,
}

impl<T> Callback<T> {
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            call: Box::new(call),
            on_close: None,
        }
    }

    /// 设置关闭钩子，值流结束时恰好调用一次。
    pub fn on_close<G>(mut self, hook: G) -> Self
    where
        G: FnOnce(CloseReason) + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("on_close", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

/// 已擦除类型的消费策略，由 [`IntoDelivery`] 生成后交给会话内部持有。
pub struct Delivery<T> {
    kind: DeliveryKind<T>,
}

enum DeliveryKind<T> {
    Callback {
        call: Box<dyn Fn(T) + Send + Sync>,
        on_close: Mutex<Option<Box<dyn FnOnce(CloseReason) + Send>>>,
    },
    Handler(Box<dyn HandlerObject<T>>),
    Channel(ChannelSender<T>),
}

impl<T> fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.kind {
            DeliveryKind::Callback { .. } => "callback",
            DeliveryKind::Handler(_) => "handler",
            DeliveryKind::Channel(_) => "channel",
        };
        f.debug_struct("Delivery").field("mode", &mode).finish()
    }
}

/// 可以绑定为消费策略的类型。
///
/// 闭包 `Fn(T)`、[`Callback`]、[`Stateful`] 与 [`Channel`] 均已实现。
pub trait IntoDelivery<T> {
    /// 交还给调用方的接收端。
    type Receiver;

    fn into_delivery(self) -> (Delivery<T>, Self::Receiver);
}

impl<T: 'static> IntoDelivery<T> for Callback<T> {
    type Receiver = ();

    fn into_delivery(self) -> (Delivery<T>, Self::Receiver) {
        let kind = DeliveryKind::Callback {
            call: self.call,
            on_close: Mutex::new(self.on_close),
        };
        (Delivery { kind }, ())
    }
}

impl<T, F> IntoDelivery<T> for F
where
    T: 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    type Receiver = ();

    fn into_delivery(self) -> (Delivery<T>, Self::Receiver) {
        Callback::new(self).into_delivery()
    }
}

impl<T, H> IntoDelivery<T> for Stateful<H>
where
    T: 'static,
    H: Handler<T>,
{
    type Receiver = H::Receiver;

    fn into_delivery(self) -> (Delivery<T>, Self::Receiver) {
        let receiver = self.0.receiver();
        let kind = DeliveryKind::Handler(Box::new(self.0));
        (Delivery { kind }, receiver)
    }
}

impl<T: Send + 'static> IntoDelivery<T> for Channel {
    type Receiver = ChannelReceiver<T>;

    fn into_delivery(self) -> (Delivery<T>, Self::Receiver) {
        let (sender, receiver) = self.split();
        let kind = DeliveryKind::Channel(sender);
        (Delivery { kind }, receiver)
    }
}

/// `Handler` 的对象安全投影，去掉关联类型后才能装箱。
trait HandlerObject<T>: Send + Sync {
    fn handle(&self, value: T);
    fn on_close(&self, reason: CloseReason);
}

impl<T, H: Handler<T>> HandlerObject<T> for H {
    fn handle(&self, value: T) {
        Handler::handle(self, value);
    }

    fn on_close(&self, reason: CloseReason) {
        Handler::on_close(self, reason);
    }
}

/// 会话内部统一的交付入口。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `emit` 返回值是否真正进入了消费策略；关闭后或通道拒收时返回 `false`；
///   - `finish` 返回本次调用是否是首次关闭；重复调用无副作用；
///   - 关闭钩子在所有已进入的 `emit` 返回之后才运行，不会与回调交错。
/// - **执行 (How)**：`emit` 进入时递增在途计数并检查关闭标志，退出时递减；
///   `finish` 以 `swap` 抢占关闭权并记录原因，由最后一个离开的参与者（`finish` 本身或在途的 `emit`）
///   运行钩子。回调内部重入关闭同一个 sink 时，钩子推迟到该回调返回后运行，不会自锁。
pub(crate) struct Sink<T> {
    kind: DeliveryKind<T>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    reason: Mutex<Option<CloseReason>>,
    hook_fired: AtomicBool,
}

impl<T> Sink<T> {
    pub(crate) fn new(delivery: Delivery<T>) -> Self {
        Self {
            kind: delivery.kind,
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            reason: Mutex::new(None),
            hook_fired: AtomicBool::new(false),
        }
    }

    pub(crate) fn emit(&self, value: T) -> bool {
        let _guard = InFlight::enter(self);
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match &self.kind {
            DeliveryKind::Callback { call, .. } => {
                call(value);
                true
            }
            DeliveryKind::Handler(handler) => {
                handler.handle(value);
                true
            }
            DeliveryKind::Channel(sender) => sender.send(value),
        }
    }

    pub(crate) fn finish(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.reason.lock() = Some(reason);
        self.close_if_idle();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close_if_idle(&self) {
        if self.in_flight.load(Ordering::SeqCst) != 0 {
            return;
        }
        let Some(reason) = *self.reason.lock() else {
            return;
        };
        if self.hook_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(%reason, "delivery finished");
        match &self.kind {
            DeliveryKind::Callback { on_close, .. } => {
                // 先取出再调用，钩子执行期间不持锁。
                let hook = on_close.lock().take();
                if let Some(hook) = hook {
                    hook(reason);
                }
            }
            DeliveryKind::Handler(handler) => handler.on_close(reason),
            DeliveryKind::Channel(sender) => sender.close(reason),
        }
    }
}

/// `emit` 的在途登记；回调 panic 时同样会离场，钩子不会因此丢失。
struct InFlight<'a, T> {
    sink: &'a Sink<T>,
}

impl<'a, T> InFlight<'a, T> {
    fn enter(sink: &'a Sink<T>) -> Self {
        sink.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { sink }
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.sink.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && self.sink.closed.load(Ordering::SeqCst)
        {
            self.sink.close_if_idle();
        }
    }
}
