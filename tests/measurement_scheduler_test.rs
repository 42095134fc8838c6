// ==========================================
// TKW 定时测量调度集成测试
// ==========================================
// 职责: 验证调度器在真实 SQLite 存储上的到期判定、去重与故障隔离
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod measurement_scheduler_test {
    use std::sync::Arc;
    use std::time::Duration;

    use seed_treatment::app::MeasurementDaemon;
    use seed_treatment::domain::measurement::{ArmedSession, ArmedSnapshot, Measurement};
    use seed_treatment::domain::order::Order;
    use seed_treatment::domain::types::OrderStatus;
    use seed_treatment::engine::{
        Clock, MeasurementScheduler, Notifier, Recipient, SchedulerStore,
    };
    use seed_treatment::notification::notification_channel;
    use seed_treatment::repository::{MeasurementRepository, RepositoryError, RepositoryResult};

    use crate::test_helpers::{
        new_order, setup_env, setup_env_with_notifier, RecordingNotifier, TestEnv, COMPANY,
        OPERATOR, T0,
    };

    fn start_treatment(env: &TestEnv, lot: &str) -> Order {
        let api = &env.state.order_api;
        let order = api.create_order(new_order(lot, Some(45.0)), None).unwrap();
        api.transition(&order.id, OrderStatus::TreatmentInProgress, Some(OPERATOR))
            .unwrap()
    }

    #[test]
    fn test_first_tick_creates_one_measurement_and_notifies_lab() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-100");
        env.notifier.clear();

        let report = env.state.scheduler.tick();
        assert_eq!(report.checked, 1);
        assert_eq!(report.due, 1);
        assert_eq!(report.created.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(report.created[0].created_at_ms, T0);

        let due = env.notifier.measurement_due();
        assert_eq!(due.len(), 1);
        assert_eq!(
            due[0].recipient,
            Recipient::CompanyLaboratory {
                company_id: COMPANY.to_string()
            }
        );
        assert!(due[0].deep_link.ends_with(&format!(
            "orders/{}/measurements/{}",
            order.id, report.created[0].id
        )));
    }

    #[test]
    fn test_back_to_back_ticks_do_not_duplicate() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-101");

        assert_eq!(env.state.scheduler.tick().created.len(), 1);
        assert!(env.state.scheduler.tick().created.is_empty());

        // 间隔 30 分钟: 29 分钟未到期,30 分钟到期
        env.clock.advance_minutes(29);
        assert!(env.state.scheduler.tick().created.is_empty());
        env.clock.advance_minutes(1);
        assert_eq!(env.state.scheduler.tick().created.len(), 1);

        let all = env.state.measurement_api.list_measurements(&order.id).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_no_catch_up_burst_after_downtime() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-102");
        env.state.scheduler.tick();

        // 停机 5 个周期后只补一条
        env.clock.advance_minutes(150);
        assert_eq!(env.state.scheduler.tick().created.len(), 1);
        assert!(env.state.scheduler.tick().created.is_empty());
        assert_eq!(
            env.state.measurement_api.list_measurements(&order.id).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_snapshot_from_previous_round_cannot_duplicate() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-103");
        let repo = env.state.measurement_repo.clone();

        let snapshot = repo
            .find_armed_sessions(&OrderStatus::MEASUREMENT_ACTIVE)
            .unwrap()
            .sessions
            .pop()
            .unwrap();
        assert!(snapshot.last_measurement_at_ms.is_none());

        // 同一快照并发处理两次: 只有第一次生效
        assert!(repo.create_measurement_if_due(&snapshot, T0).unwrap().is_some());
        assert!(repo.create_measurement_if_due(&snapshot, T0 + 1).unwrap().is_none());
        assert_eq!(
            env.state.measurement_api.list_measurements(&order.id).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_inactive_orders_get_no_measurements() {
        let env = setup_env(false);
        let api = &env.state.order_api;

        // 就绪但未开始
        api.create_order(new_order("LOT-110", Some(45.0)), None).unwrap();

        // 已完成
        let done = start_treatment(&env, "LOT-111");
        api.transition(&done.id, OrderStatus::PendingAcknowledgement, None)
            .unwrap();
        api.transition(&done.id, OrderStatus::Completed, None).unwrap();

        env.clock.advance_minutes(120);
        let report = env.state.scheduler.tick();
        assert_eq!(report.checked, 0);
        assert!(report.created.is_empty());
        assert!(env
            .state
            .measurement_api
            .list_measurements(&done.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_status_change_after_snapshot_is_respected() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-112");
        let repo = env.state.measurement_repo.clone();
        let snapshot = repo
            .find_armed_sessions(&OrderStatus::MEASUREMENT_ACTIVE)
            .unwrap()
            .sessions
            .pop()
            .unwrap();

        env.state
            .order_api
            .transition(&order.id, OrderStatus::Failed, None)
            .unwrap();
        assert!(repo.create_measurement_if_due(&snapshot, T0).unwrap().is_none());
    }

    #[test]
    fn test_archived_order_gets_no_further_measurements() {
        let env = setup_env(false);
        let api = &env.state.order_api;
        let order = start_treatment(&env, "LOT-113");
        assert_eq!(env.state.scheduler.tick().created.len(), 1);

        api.transition(&order.id, OrderStatus::Failed, None).unwrap();
        api.transition(&order.id, OrderStatus::Archived, None).unwrap();
        assert!(api.list_orders(COMPANY).unwrap().is_empty());

        env.clock.advance_minutes(90);
        let report = env.state.scheduler.tick();
        assert_eq!(report.checked, 0);
        assert!(report.created.is_empty());
        assert_eq!(
            env.state.measurement_api.list_measurements(&order.id).unwrap().len(),
            1
        );
    }

    // ==========================================
    // 故障隔离
    // ==========================================

    /// 对指定订单写入失败的存储包装
    struct FaultyStore {
        inner: Arc<MeasurementRepository>,
        failing_order_id: String,
    }

    impl SchedulerStore for FaultyStore {
        fn find_armed_sessions(
            &self,
            statuses: &[OrderStatus],
        ) -> RepositoryResult<ArmedSnapshot> {
            self.inner.find_armed_sessions(statuses)
        }

        fn find_armed_session_for_order(
            &self,
            order_id: &str,
        ) -> RepositoryResult<Option<ArmedSession>> {
            self.inner.find_armed_session_for_order(order_id)
        }

        fn create_measurement_if_due(
            &self,
            snapshot: &ArmedSession,
            now_ms: i64,
        ) -> RepositoryResult<Option<Measurement>> {
            if snapshot.order_id == self.failing_order_id {
                return Err(RepositoryError::DatabaseQueryError("disk I/O error".to_string()));
            }
            self.inner.create_measurement_if_due(snapshot, now_ms)
        }
    }

    #[test]
    fn test_store_fault_on_one_order_skips_only_that_order() {
        let env = setup_env(false);
        let broken = start_treatment(&env, "LOT-120");
        let healthy = start_treatment(&env, "LOT-121");

        let recorder = Arc::new(RecordingNotifier::default());
        let scheduler = MeasurementScheduler::new(
            Arc::new(FaultyStore {
                inner: env.state.measurement_repo.clone(),
                failing_order_id: broken.id.clone(),
            }),
            recorder.clone(),
            env.clock.clone() as Arc<dyn Clock>,
            "seedtreat://",
        );

        let report = scheduler.tick();
        assert_eq!(report.checked, 2);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].order_id, broken.id);
        assert_eq!(recorder.measurement_due().len(), 1);

        let measurements = &env.state.measurement_api;
        assert_eq!(measurements.list_measurements(&healthy.id).unwrap().len(), 1);
        assert!(measurements.list_measurements(&broken.id).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_order_row_skips_only_that_order() {
        let env = setup_env(false);
        let broken = start_treatment(&env, "LOT-122");
        let healthy = start_treatment(&env, "LOT-123");

        {
            let conn = env.conn.lock().unwrap();
            // 超出 u32 范围: 通过 CHECK 但无法解码
            conn.execute(
                "UPDATE orders SET tkw_measurement_interval_minutes = 5000000000 WHERE order_id = ?1",
                [&broken.id],
            )
            .unwrap();
        }

        let report = env.state.scheduler.tick();
        assert_eq!(report.checked, 2);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].order_id, broken.id);

        let measurements = &env.state.measurement_api;
        assert_eq!(measurements.list_measurements(&healthy.id).unwrap().len(), 1);
        assert!(measurements.list_measurements(&broken.id).unwrap().is_empty());
        assert_eq!(env.notifier.measurement_due().len(), 1);
    }

    #[test]
    fn test_non_positive_interval_rejected_by_store() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-124");
        let conn = env.conn.lock().unwrap();
        for bad in [0_i64, -5] {
            assert!(conn
                .execute(
                    "UPDATE orders SET tkw_measurement_interval_minutes = ?1 WHERE order_id = ?2",
                    rusqlite::params![bad, order.id],
                )
                .is_err());
        }
    }

    #[test]
    fn test_notifier_failure_does_not_roll_back_measurement() {
        // 接收端已关闭: 通知全部丢弃
        let (closed, rx) = notification_channel(1);
        drop(rx);
        let notifier: Arc<dyn Notifier> = Arc::new(closed);
        let env = setup_env_with_notifier(false, Arc::new(RecordingNotifier::default()), notifier);

        let order = start_treatment(&env, "LOT-130");
        let report = env.state.scheduler.tick();
        assert_eq!(report.created.len(), 1);
        assert_eq!(
            env.state.measurement_api.list_measurements(&order.id).unwrap().len(),
            1
        );
    }

    // ==========================================
    // 守护任务
    // ==========================================

    #[tokio::test]
    async fn test_daemon_ticks_until_shutdown() {
        let env = setup_env(false);
        let order = start_treatment(&env, "LOT-140");

        let daemon = MeasurementDaemon::new(env.state.scheduler.clone(), Duration::from_millis(10));
        let ticks = daemon
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;
        assert!(ticks >= 1);

        // 时钟未前进: 只会有一条测量
        assert_eq!(
            env.state.measurement_api.list_measurements(&order.id).unwrap().len(),
            1
        );
    }
}
