// Copyright 2023 The Arbor Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Condition checking for pool admission. The opcode set is closed: every
//! variant is matched exhaustively and anything the enum does not name is
//! refused as an invalid condition rather than ignored.

use std::collections::HashSet;

use arbor_core::core::{CoinRecord, Hash};

use crate::types::{Condition, Npc, PoolError};

/// The closed set of condition opcodes the pool understands.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConditionOpcode {
	/// Require an aggregated signature over the announced message.
	AggSig = 49,
	/// Create a new coin.
	CreateCoin = 51,
	/// Require another coin to be consumed in the same bundle.
	AssertCoinConsumed = 52,
	/// Require the spent coin to have the announced id.
	AssertMyCoinId = 53,
	/// Require wall-clock time to have passed the announced millis.
	AssertTimeExceeds = 54,
	/// Require the chain to have passed the announced height.
	AssertBlockIndexExceeds = 55,
	/// Require the spent coin to have the announced age.
	AssertBlockAgeExceeds = 56,
	/// Reserve a fee.
	AssertFee = 57,
}

impl ConditionOpcode {
	/// Map a raw opcode onto the closed set.
	pub fn from_u16(raw: u16) -> Result<ConditionOpcode, PoolError> {
		match raw {
			49 => Ok(ConditionOpcode::AggSig),
			51 => Ok(ConditionOpcode::CreateCoin),
			52 => Ok(ConditionOpcode::AssertCoinConsumed),
			53 => Ok(ConditionOpcode::AssertMyCoinId),
			54 => Ok(ConditionOpcode::AssertTimeExceeds),
			55 => Ok(ConditionOpcode::AssertBlockIndexExceeds),
			56 => Ok(ConditionOpcode::AssertBlockAgeExceeds),
			57 => Ok(ConditionOpcode::AssertFee),
			_ => Err(PoolError::InvalidCondition(raw)),
		}
	}
}

// big-endian integer atom, at most eight bytes
fn int_from_bytes(var: &[u8]) -> Result<u64, PoolError> {
	if var.len() > 8 {
		return Err(PoolError::InvalidCondition(0));
	}
	let mut value: u64 = 0;
	for b in var {
		value = (value << 8) | *b as u64;
	}
	Ok(value)
}

fn first_var(condition: &Condition) -> Result<&Vec<u8>, PoolError> {
	condition
		.vars
		.first()
		.ok_or_else(|| PoolError::InvalidCondition(condition.opcode))
}

// Checks coin consumed conditions: the named coin must be removed by the
// same bundle.
fn assert_coin_consumed(
	condition: &Condition,
	bundle_removals: &HashSet<Hash>,
) -> Result<(), PoolError> {
	let var = first_var(condition)?;
	if var.len() != 32 {
		return Err(PoolError::InvalidCondition(condition.opcode));
	}
	let coin_name = Hash::from_vec(var.clone());
	if !bundle_removals.contains(&coin_name) {
		return Err(PoolError::AssertionFailed(format!(
			"coin {} not consumed by this bundle",
			coin_name
		)));
	}
	Ok(())
}

// Checks if the coin id matches the id from the condition.
fn assert_my_coin_id(condition: &Condition, unspent: &CoinRecord) -> Result<(), PoolError> {
	let var = first_var(condition)?;
	if var.len() != 32 || unspent.coin.name() != Hash::from_vec(var.clone()) {
		return Err(PoolError::AssertionFailed("coin id mismatch".to_owned()));
	}
	Ok(())
}

// Checks if the next block index exceeds the block index from the
// condition. + 1 because the soonest the spend can land is the next block.
fn assert_block_index_exceeds(condition: &Condition, peak_height: u32) -> Result<(), PoolError> {
	let expected = int_from_bytes(first_var(condition)?)?;
	if (peak_height as u64 + 1) <= expected {
		return Err(PoolError::AssertionFailed(format!(
			"chain below index {}",
			expected
		)));
	}
	Ok(())
}

// Checks if the coin age exceeds the age from the condition.
fn assert_block_age_exceeds(
	condition: &Condition,
	unspent: &CoinRecord,
	peak_height: u32,
) -> Result<(), PoolError> {
	let expected_age = int_from_bytes(first_var(condition)?)?;
	let expected_index = expected_age + unspent.confirmed_sub_height as u64;
	if (peak_height as u64 + 1) <= expected_index {
		return Err(PoolError::AssertionFailed(format!(
			"coin younger than {}",
			expected_age
		)));
	}
	Ok(())
}

// Checks if the current time in millis exceeds the time from the condition.
fn assert_time_exceeds(condition: &Condition, now_millis: u64) -> Result<(), PoolError> {
	let expected = int_from_bytes(first_var(condition)?)?;
	if now_millis <= expected {
		return Err(PoolError::AssertionFailed(format!(
			"time below {}",
			expected
		)));
	}
	Ok(())
}

/// Check all conditions of one spend against current state. Opcodes without
/// a mempool-side assertion (signatures, coin creation, fees) pass here and
/// are enforced at block validation instead.
pub fn check_conditions(
	npc: &Npc,
	unspent: &CoinRecord,
	bundle_removals: &HashSet<Hash>,
	peak_height: u32,
	now_millis: u64,
) -> Result<(), PoolError> {
	for condition in &npc.conditions {
		match ConditionOpcode::from_u16(condition.opcode)? {
			ConditionOpcode::AssertCoinConsumed => {
				assert_coin_consumed(condition, bundle_removals)?
			}
			ConditionOpcode::AssertMyCoinId => assert_my_coin_id(condition, unspent)?,
			ConditionOpcode::AssertBlockIndexExceeds => {
				assert_block_index_exceeds(condition, peak_height)?
			}
			ConditionOpcode::AssertBlockAgeExceeds => {
				assert_block_age_exceeds(condition, unspent, peak_height)?
			}
			ConditionOpcode::AssertTimeExceeds => assert_time_exceeds(condition, now_millis)?,
			ConditionOpcode::AggSig
			| ConditionOpcode::CreateCoin
			| ConditionOpcode::AssertFee => {}
		}
	}
	Ok(())
}
