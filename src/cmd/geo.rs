use bytes::Bytes;

use crate::{
    client::Client,
    cmd::{expect_bytes_array, expect_count},
    parse::to_float,
    Command, Error, Frame,
};

// 服务端能够编码的纬度范围（Web Mercator）。
const LATITUDE_LIMIT: f64 = 85.051_128_78;

/// 经纬度坐标。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

/// 距离单位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl GeoUnit {
    fn as_str(&self) -> &'static str {
        match self {
            GeoUnit::Meters => "m",
            GeoUnit::Kilometers => "km",
            GeoUnit::Miles => "mi",
            GeoUnit::Feet => "ft",
        }
    }
}

impl std::str::FromStr for GeoUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" => Ok(GeoUnit::Meters),
            "km" => Ok(GeoUnit::Kilometers),
            "mi" => Ok(GeoUnit::Miles),
            "ft" => Ok(GeoUnit::Feet),
            other => Err(Error::InvalidArgument(format!("未知的距离单位：{}", other))),
        }
    }
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> GeoPoint {
        GeoPoint {
            longitude,
            latitude,
        }
    }

    /// 检查坐标是否在服务端可以接受的范围内。
    fn validate(&self) -> crate::Result<()> {
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::InvalidArgument(format!(
                "经度超出范围：{}",
                self.longitude
            )));
        }
        if !(-LATITUDE_LIMIT..=LATITUDE_LIMIT).contains(&self.latitude) {
            return Err(Error::InvalidArgument(format!(
                "纬度超出范围：{}",
                self.latitude
            )));
        }
        Ok(())
    }
}

impl Command {
    /// 添加一个位置。
    ///
    /// 格式：GEOADD key longitude latitude member
    pub fn geoadd(
        key: impl AsRef<[u8]>,
        name: impl AsRef<[u8]>,
        point: GeoPoint,
    ) -> crate::Result<Command> {
        point.validate()?;
        Ok(Command::new("GEOADD")
            .with_key(key)
            .arg(point.longitude.to_string())
            .arg(point.latitude.to_string())
            .arg(name))
    }

    /// 格式：GEODIST key member1 member2 unit
    pub fn geodist(
        key: impl AsRef<[u8]>,
        a: impl AsRef<[u8]>,
        b: impl AsRef<[u8]>,
        unit: GeoUnit,
    ) -> Command {
        Command::new("GEODIST")
            .with_key(key)
            .arg(a)
            .arg(b)
            .arg(unit.as_str())
    }

    /// 查找以`center`为圆心、`radius_km`千米为半径的圆内（含边界）的位置，
    /// 由近到远排列。
    ///
    /// 格式：GEOSEARCH key FROMLONLAT longitude latitude BYRADIUS radius km ASC
    pub fn geosearch(
        key: impl AsRef<[u8]>,
        center: GeoPoint,
        radius_km: f64,
    ) -> crate::Result<Command> {
        center.validate()?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "半径必须是非负数：{}",
                radius_km
            )));
        }
        Ok(Command::new("GEOSEARCH")
            .with_key(key)
            .arg("FROMLONLAT")
            .arg(center.longitude.to_string())
            .arg(center.latitude.to_string())
            .arg("BYRADIUS")
            .arg(radius_km.to_string())
            .arg(GeoUnit::Kilometers.as_str())
            .arg("ASC"))
    }
}

impl Client {
    /// 添加一个位置，返回新加入的个数（更新已有位置时为 0）。
    pub async fn geoadd(
        &mut self,
        key: impl AsRef<[u8]>,
        name: impl AsRef<[u8]>,
        point: GeoPoint,
    ) -> crate::Result<u64> {
        let frame = self.send_and_receive(Command::geoadd(key, name, point)?).await?;
        expect_count(frame)
    }

    /// 两个位置之间的距离。任意一个位置不存在时返回`Ok(None)`。
    pub async fn geodist(
        &mut self,
        key: impl AsRef<[u8]>,
        a: impl AsRef<[u8]>,
        b: impl AsRef<[u8]>,
        unit: GeoUnit,
    ) -> crate::Result<Option<f64>> {
        let frame = self.send_and_receive(Command::geodist(key, a, b, unit)).await?;
        decode_distance(frame)
    }

    /// 查找半径内的位置名称，由近到远排列。
    pub async fn geosearch(
        &mut self,
        key: impl AsRef<[u8]>,
        center: GeoPoint,
        radius_km: f64,
    ) -> crate::Result<Vec<Bytes>> {
        let frame = self
            .send_and_receive(Command::geosearch(key, center, radius_km)?)
            .await?;
        expect_bytes_array(frame)
    }
}

/// 解析`GEODIST`的响应：以字符串表示的浮点数，或空值。
pub fn decode_distance(frame: Frame) -> crate::Result<Option<f64>> {
    match frame {
        Frame::Null => Ok(None),
        frame => match to_float(&frame) {
            Some(distance) => Ok(Some(distance)),
            None => Err(frame.to_error().into()),
        },
    }
}
