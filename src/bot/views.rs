// Views: text + inline keyboard, rendered fresh from current state on every call

use std::collections::BTreeMap;

use crate::alist::{Entry, StorageMount};
use crate::stream::{redact_destination, StreamTarget};
use crate::system::network::{WifiInfo, WifiNetwork};
use crate::system::{ProcessInfo, SystemSnapshot};

use super::action::{Action, ItemRef, MAX_CALLBACK_DATA_LEN};
use super::session::{page_count, PAGE_SIZE};
use super::types::{Button, View};
use super::util::{format_duration, format_size_kb};

/// Key name that falls back to RTMP_URL when no stored key has it
pub const DEFAULT_KEY_NAME: &str = "default";

fn btn(text: impl Into<String>, action: Action) -> Button {
    Button::callback(text, action.encode())
}

fn back_to_main() -> Button {
    btn("🔙 Main menu", Action::MainMenu)
}

pub fn status_text(s: &SystemSnapshot) -> String {
    let battery = match &s.battery {
        Some(b) => format!(
            "{}% ({})",
            b.percentage.map(|p| p.to_string()).unwrap_or_else(|| "N/A".into()),
            b.status.as_deref().unwrap_or("N/A")
        ),
        None => "N/A".to_string(),
    };
    let temperature = s
        .temperature_c
        .map(|t| format!("{:.1}°C", t))
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "📊 *Termux Control Panel*\n\
         ━━━━━━━━━━━━━━━━\n\
         ⏱ Uptime: `{}`\n\
         💻 CPU: `{:.1}%`\n\
         🧠 Memory: `{:.1}%`\n\
         💾 Storage: `{:.1}%`\n\
         🔋 Battery: `{}`\n\
         🌡 Temperature: `{}`",
        format_duration(s.uptime),
        s.cpu_percent,
        s.memory_percent,
        s.disk_percent,
        battery,
        temperature
    )
}

pub fn main_menu(s: &SystemSnapshot) -> View {
    View::text(status_text(s))
        .row(vec![
            btn("📂 Files", Action::OpenRoot),
            btn("📡 Network", Action::NetworkMenu),
        ])
        .row(vec![
            btn("📺 Live relay", Action::StreamConsole),
            btn("⚙️ Processes", Action::Processes),
        ])
        .row(vec![
            btn("📝 Logs", Action::Logs),
            btn("📂 Alist", Action::AlistMenu),
        ])
        .row(vec![btn("🔄 Refresh", Action::MainMenu)])
}

fn listing_header(path: &str) -> View {
    View::text(format!("📂 *File manager*\nPath: `{}`", path))
        .row(vec![btn(format!("📂 {}", path), Action::Noop)])
        .row(vec![btn("⬆️ Up", Action::GoUp)])
}

fn listing_footer(view: View) -> View {
    view.row(vec![
        btn("🔄 Refresh", Action::RefreshListing),
        back_to_main(),
    ])
}

/// One page of a listing. Buttons carry refs into `generation`.
pub fn file_listing(path: &str, items: &[Entry], generation: u32, page: usize) -> View {
    let mut view = listing_header(path);

    let pages = page_count(items.len());
    let page = page.min(pages - 1);
    let start = page * PAGE_SIZE;

    if items.is_empty() {
        view = view.row(vec![btn("(empty)", Action::Noop)]);
    }
    for (index, entry) in items.iter().enumerate().skip(start).take(PAGE_SIZE) {
        let item = ItemRef::new(generation, index);
        let button = if entry.is_dir {
            btn(format!("📁 {}", entry.name), Action::EnterDirectory(item))
        } else {
            let size = entry.size.map(|s| format!(" ({})", format_size_kb(s))).unwrap_or_default();
            btn(format!("📄 {}{}", entry.name, size), Action::SelectFile(item))
        };
        view = view.row(vec![button]);
    }

    if pages > 1 {
        let mut nav = Vec::new();
        if page > 0 {
            nav.push(btn("◀️ Prev", Action::ChangePage(page - 1)));
        }
        nav.push(btn(format!("{}/{}", page + 1, pages), Action::Noop));
        if page + 1 < pages {
            nav.push(btn("Next ▶️", Action::ChangePage(page + 1)));
        }
        view = view.row(nav);
    }

    listing_footer(view)
}

/// Listing that failed; the error stays visible and navigation still works
pub fn listing_error(path: &str, error: &str) -> View {
    let view = listing_header(path).row(vec![btn(format!("❌ Error: {}", first_line(error)), Action::Noop)]);
    let mut view = listing_footer(view);
    view.text = format!("{}\n\n❌ {}", view.text, error);
    view
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

pub fn file_options(entry: &Entry, item: ItemRef) -> View {
    View::text(format!("📄 *File*: {}", entry.name))
        .row(vec![btn(format!("📄 {}", entry.name), Action::Noop)])
        .row(vec![
            btn("▶️ Relay", Action::RelayPicker(item)),
            btn("🔗 Direct link", Action::DirectLink(item)),
        ])
        .row(vec![btn("🗑 Delete", Action::DeleteConfirm(item))])
        .row(vec![btn("🔙 Back to list", Action::BackToListing)])
}

/// Destination choice for relaying `entry`. Keys whose callback would exceed
/// Telegram's limit are skipped.
pub fn relay_picker(entry: &Entry, item: ItemRef, keys: &BTreeMap<String, String>, has_default_url: bool) -> View {
    let mut names: Vec<&str> = keys.keys().map(|k| k.as_str()).collect();
    if has_default_url && !keys.contains_key(DEFAULT_KEY_NAME) {
        names.insert(0, DEFAULT_KEY_NAME);
    }

    let mut view = View::text(format!("📺 *Relay* {}\nChoose a destination:", entry.name));
    let mut any = false;
    for name in names {
        let action = Action::Relay {
            item,
            key: name.to_string(),
        };
        if action.encode().len() > MAX_CALLBACK_DATA_LEN {
            continue;
        }
        view = view.row(vec![btn(format!("📡 {}", name), action)]);
        any = true;
    }
    if !any {
        view.text.push_str("\n\nNo stream keys yet. Add one in the key manager.");
        view = view.row(vec![btn("🔑 Stream keys", Action::KeyMenu)]);
    }
    view.row(vec![btn("🔙 Back", Action::SelectFile(item))])
}

pub fn delete_confirm(entry: &Entry, item: ItemRef) -> View {
    let kind = if entry.is_dir { "folder" } else { "file" };
    View::text(format!(
        "⚠️ *Delete {}?*\n`{}`\n\nThis cannot be undone.",
        kind, entry.name
    ))
    .row(vec![
        btn("🗑 Yes, delete", Action::DeleteExec(item)),
        btn("✖️ Cancel", Action::BackToListing),
    ])
}

pub fn processes(procs: &[ProcessInfo]) -> View {
    let mut text = String::from("⚙️ *Top processes (memory)*\n\n");
    if procs.is_empty() {
        text.push_str("(none above 0.5%)\n");
    }
    for p in procs {
        text.push_str(&format!("`{}` | {} | {:.1}%\n", p.pid, p.name, p.memory_percent));
    }
    View::text(text)
        .row(vec![btn("🔄 Refresh", Action::Processes)])
        .row(vec![back_to_main()])
}

pub fn network_menu(wifi: Option<&WifiInfo>) -> View {
    let header = match wifi {
        Some(w) => format!("SSID: {} | IP: {}", w.ssid, w.ip),
        None => "SSID: unavailable".to_string(),
    };
    View::text("📡 *Network*")
        .row(vec![btn(header, Action::NetworkMenu)])
        .row(vec![
            btn("🔍 Scan Wi-Fi", Action::ScanWifi),
            btn("🚀 Speed test", Action::SpeedTest),
        ])
        .row(vec![btn("🌐 Public IP", Action::PublicIp), back_to_main()])
}

pub fn wifi_scan_text(networks: &[WifiNetwork]) -> String {
    let mut text = String::from("🔍 *Wi-Fi scan*\n");
    if networks.is_empty() {
        text.push_str("No networks found\n");
    }
    for n in networks {
        text.push_str(&format!(
            "📶 {} ({}dBm)\n",
            n.ssid.as_deref().filter(|s| !s.is_empty()).unwrap_or("Hidden"),
            n.rssi.unwrap_or(0)
        ));
    }
    text
}

pub fn alist_menu(version: Option<&str>, lan_ip: &str, alist_url: &str) -> View {
    let port = alist_url
        .rsplit(':')
        .next()
        .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or("5244");
    View::text(format!(
        "📂 *Alist*\nVersion: {}\nLAN address: http://{}:{}",
        version.unwrap_or("offline"),
        lan_ip,
        port
    ))
    .row(vec![
        btn("💾 Storage", Action::AlistStorage),
        Button::url("🔗 Open", alist_url),
    ])
    .row(vec![
        btn("🔑 Reset password", Action::AlistResetPassword),
        btn("📝 Logs", Action::AlistLogs),
    ])
    .row(vec![back_to_main()])
}

pub fn storage_text(mounts: &[StorageMount]) -> String {
    let mut text = String::from("💾 *Alist storage*\n");
    if mounts.is_empty() {
        text.push_str("No storage mounted\n");
    }
    for m in mounts {
        let dot = if m.working { "🟢" } else { "🔴" };
        text.push_str(&format!("{} {}\n", dot, m.mount_path));
    }
    text
}

pub fn stream_console(running: bool, target: Option<&StreamTarget>) -> View {
    let status = if running { "🟢 Streaming" } else { "🔴 Idle" };
    let mut text = String::from("📺 *Live relay console*");
    if let Some(t) = target {
        text.push_str(&format!(
            "\nSource: `{}`\nDestination: `{}`",
            t.source,
            redact_destination(&t.destination)
        ));
    }
    View::text(text)
        .row(vec![btn(format!("Status: {}", status), Action::Noop)])
        .row(vec![
            btn("▶️ Start", Action::StreamInput),
            btn("⏹ Stop", Action::StopStream),
        ])
        .row(vec![btn("🔑 Stream keys", Action::KeyMenu)])
        .row(vec![back_to_main()])
}

pub fn key_menu(keys: &BTreeMap<String, String>) -> View {
    let mut text = String::from("🔑 *Stream keys*\n");
    if keys.is_empty() {
        text.push_str("\nNo keys saved.");
    }
    let mut view = View::default();
    for (name, endpoint) in keys {
        text.push_str(&format!("\n• `{}` → `{}`", name, redact_destination(endpoint)));
        let action = Action::KeyDelete(name.clone());
        if action.encode().len() <= MAX_CALLBACK_DATA_LEN {
            view = view.row(vec![btn(format!("🗑 {}", name), action)]);
        }
    }
    view.text = text;
    view.row(vec![btn("➕ Add key", Action::KeyAdd)])
        .row(vec![btn("📺 Relay console", Action::StreamConsole), back_to_main()])
}

pub fn help_text() -> String {
    "🤖 *Termux control bot*\n\n\
     /menu - control panel\n\
     /status - system status\n\
     /stream - live relay console\n\
     /keys - manage stream keys\n\
     /cmd <command> - run a shell command\n\
     /help - this help"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<Entry> {
        (0..n).map(|i| Entry::file(&format!("f{}.mp4", i), 4096)).collect()
    }

    #[test]
    fn test_listing_refs_carry_generation() {
        let items = vec![Entry::file("clip.mp4", 2048), Entry::dir("sub")];
        let view = file_listing("/movies", &items, 5, 0);
        let data = view.callback_data();
        assert!(data.contains(&"fm_opt_5.0"));
        assert!(data.contains(&"fm_cd_5.1"));
        assert!(view.keyboard.iter().flatten().any(|b| b.text == "📄 clip.mp4 (2KB)"));
    }

    #[test]
    fn test_listing_pages() {
        let items = entries(45);
        let first = file_listing("/", &items, 1, 0);
        let data = first.callback_data();
        assert!(data.contains(&"fm_opt_1.19"));
        assert!(!data.contains(&"fm_opt_1.20"));
        assert!(data.contains(&"fm_page_1"));

        let last = file_listing("/", &items, 1, 2);
        let data = last.callback_data();
        assert!(data.contains(&"fm_opt_1.44"));
        assert!(data.contains(&"fm_page_1"));
        assert!(!data.contains(&"fm_page_3"));
    }

    #[test]
    fn test_small_listing_has_no_pager() {
        let view = file_listing("/", &entries(3), 1, 0);
        assert!(!view.callback_data().iter().any(|d| d.starts_with("fm_page_")));
    }

    #[test]
    fn test_relay_picker_includes_default() {
        let mut keys = BTreeMap::new();
        keys.insert("chan1".to_string(), "rtmps://x/y".to_string());
        let entry = Entry::file("clip.mp4", 1);
        let view = relay_picker(&entry, ItemRef::new(2, 0), &keys, true);
        let data = view.callback_data();
        assert_eq!(data[0], "stream_exec_2.0_default");
        assert!(data.contains(&"stream_exec_2.0_chan1"));

        let view = relay_picker(&entry, ItemRef::new(2, 0), &BTreeMap::new(), false);
        assert!(view.callback_data().contains(&"key_menu"));
    }

    #[test]
    fn test_all_rendered_callbacks_parse() {
        let mut keys = BTreeMap::new();
        keys.insert("chan_1".to_string(), "rtmps://x/y".to_string());
        let entry = Entry::file("a", 1);
        let item = ItemRef::new(1, 0);
        let views = vec![
            file_listing("/", &entries(30), 1, 1),
            file_options(&entry, item),
            relay_picker(&entry, item, &keys, true),
            delete_confirm(&entry, item),
            network_menu(None),
            alist_menu(Some("v3"), "192.168.1.2", "http://127.0.0.1:5244"),
            stream_console(false, None),
            key_menu(&keys),
        ];
        for view in views {
            for data in view.callback_data() {
                assert!(data.parse::<Action>().is_ok(), "unparsable: {}", data);
                assert!(data.len() <= MAX_CALLBACK_DATA_LEN);
            }
        }
    }

    #[test]
    fn test_storage_text() {
        let text = storage_text(&[StorageMount {
            mount_path: "/local".to_string(),
            working: true,
        }]);
        assert!(text.contains("🟢 /local"));
    }
}
