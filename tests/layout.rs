// Layout conformance tests for the records other processes read.
use memoffset::offset_of;
use rtb_datacache::Cache::Store::StoredRecord;
use rtb_datacache::{CampaignBudget, CampaignKey};
use std::mem::{align_of, size_of};

#[test]
fn test_campaign_budget_layout() {
    let size = size_of::<CampaignBudget>();
    let align = align_of::<CampaignBudget>();
    let off_id = offset_of!(CampaignBudget, campaign_id);
    let off_limit = offset_of!(CampaignBudget, day_budget_limit);
    let off_spent = offset_of!(CampaignBudget, day_budget_spent);
    let off_show = offset_of!(CampaignBudget, day_show_limit);
    let off_click = offset_of!(CampaignBudget, day_click_limit);

    println!(
        "CampaignBudget => size: {size}, align: {align}, offsets: [campaign_id:{off_id}, day_budget_limit:{off_limit}, day_budget_spent:{off_spent}, day_show_limit:{off_show}, day_click_limit:{off_click}]"
    );

    assert_eq!(size, 32);
    assert_eq!(align, align_of::<u64>());
    assert_eq!(off_id, 0);
    assert_eq!(off_limit, 8);
    assert_eq!(off_spent, 16);
    assert_eq!(off_show, 24);
    assert_eq!(off_click, 28);
}

#[test]
fn test_stored_record_layout() {
    type Record = StoredRecord<CampaignKey, CampaignBudget>;
    assert_eq!(size_of::<CampaignKey>(), 4);
    assert_eq!(offset_of!(Record, key), 0);
    // value is padded up to its own alignment
    assert_eq!(offset_of!(Record, value), 8);
    assert_eq!(size_of::<Record>(), 40);
}
