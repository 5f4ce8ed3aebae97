use crate::Command;

// 事务相关的命令只由`Batch`在内部使用。
impl Command {
    /// 格式：MULTI
    pub(crate) fn multi() -> Command {
        Command::new("MULTI")
    }

    /// 格式：EXEC
    pub(crate) fn exec() -> Command {
        Command::new("EXEC")
    }

    /// 格式：WATCH key [key ...]
    pub(crate) fn watch(keys: Vec<bytes::Bytes>) -> Command {
        Command::new("WATCH").args(keys)
    }

    /// 格式：UNWATCH
    pub(crate) fn unwatch() -> Command {
        Command::new("UNWATCH")
    }
}
