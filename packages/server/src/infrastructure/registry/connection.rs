//! 接続レジストリ
//!
//! ## 責務
//!
//! - 接続 ID → `ClientConnection` の対応を保持する
//! - 同じ ID の 2 本目の接続は登録しない（呼び出し側が新しい方を閉じる）
//!
//! ## 設計ノート
//!
//! `for_each` はロックを取ったままスナップショットを作り、ロックを外してから
//! コールバックを呼ぶ。コールバック内で `remove` などを呼んでもデッドロックしない。

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::domain::{ClientConnection, ConnectionError};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ClientConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under its id. Returns false when the id is already taken.
    pub fn add_if_absent(&self, conn: ClientConnection) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections.contains_key(conn.id()) {
            tracing::debug!("Connection '{}' is already registered", conn.id());
            return false;
        }
        connections.insert(conn.id().to_string(), conn);
        true
    }

    pub fn remove(&self, id: &str) -> Option<ClientConnection> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ClientConnection> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call `f` for every connection registered when the call started.
    pub fn for_each(&self, mut f: impl FnMut(&ClientConnection)) {
        for conn in self.snapshot() {
            f(&conn);
        }
    }

    /// Ask every connection to close. Returns how many were asked and the
    /// last error seen; removal happens when each connection's task ends.
    pub fn close_all(&self) -> (usize, Option<ConnectionError>) {
        let mut count = 0;
        let mut last_error = None;
        for conn in self.snapshot() {
            count += 1;
            if let Err(e) = conn.close() {
                tracing::warn!("Failed to close connection '{}': {}", conn.id(), e);
                last_error = Some(e);
            }
        }
        (count, last_error)
    }

    fn snapshot(&self) -> Vec<ClientConnection> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::Outbound;

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - add_if_absent が重複 ID を拒否すること
    // - for_each 中にレジストリを変更してもデッドロックしないこと
    // - close_all が全接続に Close を送り、最後のエラーを返すこと
    // ========================================

    fn connection(id: &str) -> (ClientConnection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(id, tx), rx)
    }

    #[test]
    fn test_add_if_absent_rejects_duplicate() {
        // テスト項目: 同じ ID の 2 本目の接続は登録されない
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connection("alice");
        let (second, _rx2) = connection("alice");

        // when (操作):
        let added_first = registry.add_if_absent(first);
        let added_second = registry.add_if_absent(second);

        // then (期待する結果):
        assert!(added_first);
        assert!(!added_second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_and_get() {
        // テスト項目: remove は登録済みの接続を返し、2 回目は None
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("alice");
        registry.add_if_absent(conn);

        // when (操作):
        let found = registry.get("alice");
        let removed = registry.remove("alice");
        let removed_again = registry.remove("alice");

        // then (期待する結果):
        assert_eq!(found.map(|c| c.id().to_string()), Some("alice".to_string()));
        assert!(removed.is_some());
        assert!(removed_again.is_none());
        assert!(registry.is_empty());
        assert!(!registry.is_connected("alice"));
    }

    #[test]
    fn test_for_each_tolerates_removal_from_callback() {
        // テスト項目: for_each のコールバック内で remove してもデッドロックしない
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for id in ["a", "b", "c"] {
            let (conn, rx) = connection(id);
            registry.add_if_absent(conn);
            receivers.push(rx);
        }

        // when (操作):
        let mut visited = Vec::new();
        registry.for_each(|conn| {
            visited.push(conn.id().to_string());
            registry.remove(conn.id());
        });

        // then (期待する結果):
        visited.sort();
        assert_eq!(visited, vec!["a", "b", "c"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_reports_count_and_last_error() {
        // テスト項目: close_all は全接続に Close を送り、失敗した接続のエラーを返す
        // given (前提条件):
        let registry = ConnectionRegistry::new();
        let (alive, mut alive_rx) = connection("alive");
        let (gone, gone_rx) = connection("gone");
        registry.add_if_absent(alive);
        registry.add_if_absent(gone);
        drop(gone_rx);

        // when (操作):
        let (count, last_error) = registry.close_all();

        // then (期待する結果):
        assert_eq!(count, 2);
        assert_eq!(last_error, Some(ConnectionError::Closed("gone".to_string())));
        assert_eq!(alive_rx.try_recv().ok(), Some(Outbound::Close));
    }
}
