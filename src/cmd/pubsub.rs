use crate::{client::Client, cmd::expect_count, Command};

impl Command {
    /// 向给定的信道发布信息。
    ///
    /// 格式：PUBLISH channel message
    pub fn publish(channel: impl AsRef<[u8]>, message: impl AsRef<[u8]>) -> Command {
        Command::new("PUBLISH").arg(channel).arg(message)
    }

    /// 格式：SUBSCRIBE channel [channel ...]
    pub(crate) fn subscribe(channels: &[String]) -> Command {
        Command::new("SUBSCRIBE").args(channels)
    }

    /// 格式：UNSUBSCRIBE [channel ...]
    pub(crate) fn unsubscribe(channels: &[String]) -> Command {
        Command::new("UNSUBSCRIBE").args(channels)
    }
}

impl Client {
    /// 向给定的信道发布信息。对应`Publish`命令。
    ///
    /// # Output
    /// 返回收到这条信息的订阅者的数量。
    pub async fn publish(
        &mut self,
        channel: impl AsRef<[u8]>,
        message: impl AsRef<[u8]>,
    ) -> crate::Result<u64> {
        let frame = self
            .send_and_receive(Command::publish(channel, message))
            .await?;
        expect_count(frame)
    }
}
