//! 日志安装入口只能生效一次。

use spark_query::logging::{self, LoggingError};

#[test]
fn install_succeeds_once() {
    logging::install().expect("首次安装应成功");
    assert!(matches!(logging::install(), Err(LoggingError::AlreadyInstalled)));
}
