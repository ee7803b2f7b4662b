//! Points ledger and reward claims.
//!
//! A balance only moves in three ways: a challenge completion credits it (see
//! [`crate::challenges`]), an explicit credit adds to it, and a reward claim overwrites it with
//! `balance - cost`. The claim is a read-check-write, so it runs under the owner's lock and in
//! one transaction together with the claim record.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Result, ValidationError};
use crate::model::RewardClaim;
use crate::storage;
use crate::tracker::Tracker;

/// An item owners can spend points on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reward {
    pub id: &'static str,
    pub name: &'static str,
    pub cost: i64,
}

#[derive(Debug, Clone)]
pub struct RewardCatalog {
    rewards: Vec<Reward>,
}

impl RewardCatalog {
    pub fn new(rewards: Vec<Reward>) -> Self {
        Self { rewards }
    }

    pub fn get(&self, reward_id: &str) -> Option<&Reward> {
        self.rewards.iter().find(|r| r.id == reward_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reward> {
        self.rewards.iter()
    }

    pub fn standard() -> Self {
        let reward = |id, name, cost| Reward { id, name, cost };
        Self::new(vec![
            reward("stepper", "Golden Stepper Badge", 100),
            reward("hydration", "Hydration Hero Badge", 150),
            reward("legend", "Fitness Legend Title", 300),
            reward("nerd", "Nutrition Nerd Badge", 200),
            reward("avatar", "Custom Avatar Unlock", 500),
            reward("logger", "Consistent Logger Badge", 180),
            reward("theme", "Theme: Aqua Pulse", 250),
            reward("champ", "Power Champ Title", 350),
        ])
    }
}

impl Default for RewardCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Tracker {
    pub fn rewards(&self) -> &RewardCatalog {
        &self.rewards
    }

    /// Current balance. An unknown owner reads as 0.
    pub async fn get_points_balance(&self, owner_id: i64) -> Result<i64> {
        Ok(self.storage.points(owner_id).await?.unwrap_or(0))
    }

    /// Add `amount` points. Returns the new balance.
    #[instrument(skip(self))]
    pub async fn credit_points(&self, owner_id: i64, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(ValidationError::NegativeAmount(amount).into());
        }

        let _guard = self.locks.lock(owner_id).await;
        let balance = self
            .with_retry("credit_points", || self.apply_credit(owner_id, amount))
            .await?;

        info!(owner_id, points = amount, balance, "Points credited");
        Ok(balance)
    }

    /// Overwrite a balance.
    #[instrument(skip(self))]
    pub async fn set_balance(&self, owner_id: i64, value: i64) -> Result<()> {
        if value < 0 {
            return Err(ValidationError::NegativeAmount(value).into());
        }

        let _guard = self.locks.lock(owner_id).await;
        self.with_retry("set_balance", || self.apply_balance(owner_id, value))
            .await
    }

    /// Spend `cost` points on a reward. Returns the new balance.
    ///
    /// Fails without touching the balance when it is below `cost` or the reward was already
    /// claimed by this owner.
    #[instrument(skip(self))]
    pub async fn claim_reward(&self, owner_id: i64, reward_id: &str, cost: i64) -> Result<i64> {
        if cost < 0 {
            return Err(ValidationError::NegativeAmount(cost).into());
        }
        let reward_name = self
            .rewards
            .get(reward_id)
            .map_or(reward_id, |r| r.name)
            .to_string();

        let _guard = self.locks.lock(owner_id).await;
        let result = self
            .with_retry("claim_reward", || {
                self.apply_claim(owner_id, reward_id, &reward_name, cost)
            })
            .await;

        match &result {
            Ok(balance) => info!(owner_id, reward = reward_id, cost, balance, "Reward claimed"),
            Err(e) => warn!(owner_id, reward = reward_id, cost, error = %e, "Reward claim rejected"),
        }
        result
    }

    /// Claim a catalogue reward at its listed cost.
    pub async fn claim_catalog_reward(&self, owner_id: i64, reward_id: &str) -> Result<i64> {
        let cost = self
            .rewards
            .get(reward_id)
            .map(|r| r.cost)
            .ok_or_else(|| ValidationError::UnknownReward(reward_id.to_string()))?;
        self.claim_reward(owner_id, reward_id, cost).await
    }

    pub async fn claimed_rewards(&self, owner_id: i64) -> Result<Vec<RewardClaim>> {
        self.storage.list_claims(owner_id).await
    }

    async fn apply_credit(&self, owner_id: i64, amount: i64) -> Result<i64> {
        let mut tx = self.storage.begin().await?;
        let balance = storage::add_points(&mut tx, owner_id, amount).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn apply_balance(&self, owner_id: i64, value: i64) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        storage::write_points(&mut tx, owner_id, value).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_claim(
        &self,
        owner_id: i64,
        reward_id: &str,
        reward_name: &str,
        cost: i64,
    ) -> Result<i64> {
        let mut tx = self.storage.begin().await?;

        // Dropping `tx` on an early return rolls the claim back.
        let balance = storage::read_points(&mut tx, owner_id).await?;
        if balance < cost {
            return Err(ValidationError::InsufficientPoints { balance, cost }.into());
        }
        let claimed_at = self.clock.now();
        if !storage::insert_claim(&mut tx, owner_id, reward_id, reward_name, claimed_at).await? {
            return Err(ValidationError::AlreadyClaimed(reward_id.to_string()).into());
        }
        let remaining = balance - cost;
        storage::write_points(&mut tx, owner_id, remaining).await?;

        tx.commit().await?;
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::TrackerError;
    use crate::period::Zone;
    use crate::storage::Storage;
    use crate::tracker::TrackerConfig;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    async fn setup() -> (Tracker, i64) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 14, 20, 0, 0).unwrap());
        let tracker = Tracker::new(
            storage,
            TrackerConfig::standard(Zone::utc()).unwrap(),
            Arc::new(clock),
        );
        let owner = tracker.storage().create_owner("grace", true).await.unwrap();
        (tracker, owner)
    }

    #[test]
    fn test_standard_catalog() {
        let catalog = RewardCatalog::standard();
        assert_eq!(catalog.iter().count(), 8);
        assert_eq!(catalog.get("legend").map(|r| r.cost), Some(300));
        assert_eq!(catalog.get("avatar").map(|r| r.name), Some("Custom Avatar Unlock"));
        assert!(catalog.get("unicorn").is_none());
    }

    #[tokio::test]
    async fn test_credit_points() {
        let (tracker, owner) = setup().await;

        assert_eq!(tracker.credit_points(owner, 120).await.unwrap(), 120);
        assert_eq!(tracker.credit_points(owner, 0).await.unwrap(), 120);
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 120);

        let err = tracker.credit_points(owner, -5).await.unwrap_err();
        assert!(matches!(err, TrackerError::Validation(ValidationError::NegativeAmount(-5))));
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 120);
    }

    #[tokio::test]
    async fn test_unknown_owner() {
        let (tracker, _) = setup().await;

        assert_eq!(tracker.get_points_balance(404).await.unwrap(), 0);
        assert!(matches!(
            tracker.credit_points(404, 10).await,
            Err(TrackerError::NotFound(_))
        ));
        assert!(matches!(
            tracker.claim_reward(404, "stepper", 100).await,
            Err(TrackerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_balance() {
        let (tracker, owner) = setup().await;

        tracker.set_balance(owner, 75).await.unwrap();
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 75);
        assert!(tracker.set_balance(owner, -1).await.is_err());
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_claim_with_insufficient_points_leaves_balance() {
        let (tracker, owner) = setup().await;
        tracker.set_balance(owner, 200).await.unwrap();

        let err = tracker.claim_reward(owner, "legend", 300).await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Validation(ValidationError::InsufficientPoints {
                balance: 200,
                cost: 300
            })
        ));
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 200);
        assert!(tracker.claimed_rewards(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_debits_and_records() {
        let (tracker, owner) = setup().await;
        tracker.set_balance(owner, 400).await.unwrap();

        assert_eq!(tracker.claim_catalog_reward(owner, "legend").await.unwrap(), 100);
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 100);

        let claims = tracker.claimed_rewards(owner).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].reward_id, "legend");
        assert_eq!(claims[0].reward_name, "Fitness Legend Title");
        assert_eq!(claims[0].claimed_at, tracker.now());
    }

    #[tokio::test]
    async fn test_reward_claimed_once() {
        let (tracker, owner) = setup().await;
        tracker.set_balance(owner, 1000).await.unwrap();

        tracker.claim_catalog_reward(owner, "stepper").await.unwrap();
        let err = tracker.claim_catalog_reward(owner, "stepper").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Validation(ValidationError::AlreadyClaimed(_))
        ));
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn test_unknown_catalog_reward() {
        let (tracker, owner) = setup().await;
        tracker.set_balance(owner, 1000).await.unwrap();

        assert!(matches!(
            tracker.claim_catalog_reward(owner, "unicorn").await,
            Err(TrackerError::Validation(ValidationError::UnknownReward(_)))
        ));
        assert_eq!(tracker.get_points_balance(owner).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_concurrent_claims_do_not_overspend() {
        let (tracker, owner) = setup().await;
        tracker.set_balance(owner, 250).await.unwrap();

        let mut handles = Vec::new();
        for reward in ["stepper", "hydration", "nerd", "logger"] {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.claim_catalog_reward(owner, reward).await
            }));
        }

        let mut spent = 0;
        for handle in handles {
            if let Ok(balance) = handle.await.unwrap() {
                assert!(balance >= 0);
                spent += 1;
            }
        }

        let balance = tracker.get_points_balance(owner).await.unwrap();
        assert!(balance >= 0);
        assert!(spent >= 1);
        let claimed: i64 = tracker
            .claimed_rewards(owner)
            .await
            .unwrap()
            .iter()
            .filter_map(|c| tracker.rewards().get(&c.reward_id).map(|r| r.cost))
            .sum();
        assert_eq!(balance, 250 - claimed);
    }
}
