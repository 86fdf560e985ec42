// Order execution, exit management and market data stores
pub mod candle_store;
pub mod desk;
pub mod exchange;
pub mod feeds;
pub mod micro_store;
pub mod order_manager;
pub mod tp_sl;
pub mod trade_record;

pub use candle_store::CandleStore;
pub use desk::{EntryOutcome, TradeDesk};
pub use exchange::{ExchangeGateway, FillModel, FillState, PaperExchange, Submission};
pub use feeds::{KlineSource, SnapshotSource};
pub use micro_store::MicroStore;
pub use order_manager::{
    Order, OrderConfig, OrderManager, OrderStatus, OrderType, ProtocolOutcome, ProtocolReport,
};
pub use tp_sl::{
    ExitAction, ExitReason, ManagedPosition, TpSlConfig, TpSlLevels, TpSlManager, TrailingStatus,
};
pub use trade_record::{JsonlSink, MemorySink, TradeRecord, TradeSink};
