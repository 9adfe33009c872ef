//! Static app registry: display name → per-backend identifiers.
//!
//! `Launch` resolves names through this table and the foreground-app query
//! matches window focus output against the identifiers. Names the model is
//! likely to emit (including the Chinese product names) are listed as
//! aliases.

use crate::device::BackendKind;

#[derive(Debug)]
pub struct AppEntry {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub android_package: &'static str,
    pub harmony_bundle: Option<&'static str>,
    pub ios_bundle: Option<&'static str>,
}

impl AppEntry {
    pub fn identifier_for(&self, backend: BackendKind) -> Option<&'static str> {
        match backend {
            BackendKind::Adb => Some(self.android_package),
            BackendKind::Hdc => self.harmony_bundle,
            BackendKind::Ios => self.ios_bundle,
        }
    }
}

static APP_REGISTRY: &[AppEntry] = &[
    AppEntry {
        name: "WeChat",
        aliases: &["微信", "Weixin"],
        android_package: "com.tencent.mm",
        harmony_bundle: Some("com.tencent.wechat"),
        ios_bundle: Some("com.tencent.xin"),
    },
    AppEntry {
        name: "Alipay",
        aliases: &["支付宝"],
        android_package: "com.eg.android.AlipayGphone",
        harmony_bundle: Some("com.alipay.mobile.client"),
        ios_bundle: Some("com.alipay.iphoneclient"),
    },
    AppEntry {
        name: "Taobao",
        aliases: &["淘宝"],
        android_package: "com.taobao.taobao",
        harmony_bundle: Some("com.taobao.taobao4hmos"),
        ios_bundle: Some("com.taobao.taobao4iphone"),
    },
    AppEntry {
        name: "QQ",
        aliases: &[],
        android_package: "com.tencent.mobileqq",
        harmony_bundle: Some("com.tencent.qqhm"),
        ios_bundle: Some("com.tencent.mqq"),
    },
    AppEntry {
        name: "Bilibili",
        aliases: &["哔哩哔哩", "B站"],
        android_package: "tv.danmaku.bili",
        harmony_bundle: Some("yylx.danmaku.bili"),
        ios_bundle: Some("tv.danmaku.bilianime"),
    },
    AppEntry {
        name: "Xiaohongshu",
        aliases: &["小红书", "RED"],
        android_package: "com.xingin.xhs",
        harmony_bundle: Some("com.xingin.xhs_hos"),
        ios_bundle: Some("com.xingin.discover"),
    },
    AppEntry {
        name: "Douyin",
        aliases: &["抖音"],
        android_package: "com.ss.android.ugc.aweme",
        harmony_bundle: Some("com.ss.hm.ugc.aweme"),
        ios_bundle: Some("com.ss.iphone.ugc.Aweme"),
    },
    AppEntry {
        name: "Meituan",
        aliases: &["美团"],
        android_package: "com.sankuai.meituan",
        harmony_bundle: Some("com.sankuai.hmeituan"),
        ios_bundle: Some("com.meituan.imeituan"),
    },
    AppEntry {
        name: "JD",
        aliases: &["京东"],
        android_package: "com.jingdong.app.mall",
        harmony_bundle: Some("com.jd.hm.mall"),
        ios_bundle: Some("com.360buy.jdmobile"),
    },
    AppEntry {
        name: "NetEase Cloud Music",
        aliases: &["网易云音乐"],
        android_package: "com.netease.cloudmusic",
        harmony_bundle: Some("com.netease.cloudmusic.hm"),
        ios_bundle: Some("com.netease.cloudmusic"),
    },
    AppEntry {
        name: "Amap",
        aliases: &["高德地图"],
        android_package: "com.autonavi.minimap",
        harmony_bundle: Some("com.amap.hmapp"),
        ios_bundle: Some("com.autonavi.amap"),
    },
    AppEntry {
        name: "Maps",
        aliases: &["Google Maps"],
        android_package: "com.google.android.apps.maps",
        harmony_bundle: None,
        ios_bundle: Some("com.apple.Maps"),
    },
    AppEntry {
        name: "Chrome",
        aliases: &[],
        android_package: "com.android.chrome",
        harmony_bundle: None,
        ios_bundle: Some("com.google.chrome.ios"),
    },
    AppEntry {
        name: "Settings",
        aliases: &["设置"],
        android_package: "com.android.settings",
        harmony_bundle: Some("com.huawei.hmos.settings"),
        ios_bundle: Some("com.apple.Preferences"),
    },
    AppEntry {
        name: "Camera",
        aliases: &["相机"],
        android_package: "com.android.camera",
        harmony_bundle: Some("com.huawei.hmos.camera"),
        ios_bundle: Some("com.apple.camera"),
    },
    AppEntry {
        name: "Messages",
        aliases: &["信息", "短信"],
        android_package: "com.google.android.apps.messaging",
        harmony_bundle: Some("com.ohos.mms"),
        ios_bundle: Some("com.apple.MobileSMS"),
    },
];

/// Looks an app up by display name or alias, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static AppEntry> {
    let needle = name.trim();
    APP_REGISTRY.iter().find(|entry| {
        entry.name.eq_ignore_ascii_case(needle)
            || entry.aliases.iter().any(|a| a.eq_ignore_ascii_case(needle))
    })
}

/// Matches a line of focus/process output against every known identifier.
pub fn match_identifier(line: &str) -> Option<&'static AppEntry> {
    APP_REGISTRY.iter().find(|entry| {
        line.contains(entry.android_package)
            || entry.harmony_bundle.is_some_and(|b| line.contains(b))
            || entry.ios_bundle.is_some_and(|b| line.contains(b))
    })
}
